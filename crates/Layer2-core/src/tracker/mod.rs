//! ServiceTracker - 매칭 서비스의 라이브 랭킹 뷰
//!
//! 하나의 약한 리스너 구독 위에 구축된 상태 보유 뷰입니다. 현재 매칭되는
//! (등록, 인스턴스) 쌍을 선택 순서(랭킹 내림차순, 동점이면 최신 ID 우선)로
//! 유지하고, best match / all matches 접근자를 제공합니다.
//!
//! 구독은 소유자 범위입니다: 트래커가 리스너 싱크의 유일한 강한 참조를
//! 보유하므로, 트래커를 멈추거나 drop하면 구독이 다음 디스패치에서
//! 스스로 제거됩니다.

use crate::registry::{
    invoke_guarded, ListenerHandle, ServiceListener, ServiceRegistration, ServiceRegistry,
};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::debug;
use weft_foundation::{
    ranking_of, PropertyFilter, Result, ServiceInstance, TypeTag,
};

// ============================================================================
// TrackedService - 트래커가 유지하는 엔트리
// ============================================================================

/// 현재 매칭 중인 (등록, 인스턴스) 쌍
#[derive(Clone)]
pub struct TrackedService {
    pub registration: ServiceRegistration,
    pub instance: ServiceInstance,
    pub ranking: i64,
}

impl std::fmt::Debug for TrackedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedService")
            .field("registration", &self.registration)
            .field("ranking", &self.ranking)
            .finish()
    }
}

/// 선택 순서: 랭킹 내림차순, 동점이면 ID 내림차순 (최신 우선)
pub(crate) fn selection_cmp(a: &TrackedService, b: &TrackedService) -> Ordering {
    b.ranking
        .cmp(&a.ranking)
        .then_with(|| b.registration.id().cmp(&a.registration.id()))
}

// ============================================================================
// ServiceTracker
// ============================================================================

struct TrackerInner {
    entries: Vec<TrackedService>,
    listener: Option<ListenerHandle>,
    tracking: bool,
}

/// 서비스 트래커
pub struct ServiceTracker {
    registry: Arc<ServiceRegistry>,
    type_tag: TypeTag,
    filter: Option<PropertyFilter>,
    inner: RwLock<TrackerInner>,

    /// 보조 이벤트 핸들러 (tracker-of-trackers 합성용)
    handlers: RwLock<Vec<Arc<dyn ServiceListener>>>,

    /// 레지스트리 약한 구독의 유일한 강한 참조
    sink: RwLock<Option<Arc<TrackerSink>>>,
}

impl ServiceTracker {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        type_tag: TypeTag,
        filter: Option<PropertyFilter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            type_tag,
            filter,
            inner: RwLock::new(TrackerInner {
                entries: Vec::new(),
                listener: None,
                tracking: false,
            }),
            handlers: RwLock::new(Vec::new()),
            sink: RwLock::new(None),
        })
    }

    pub fn type_tag(&self) -> &TypeTag {
        &self.type_tag
    }

    pub fn filter(&self) -> Option<&PropertyFilter> {
        self.filter.as_ref()
    }

    // ========================================================================
    // 추적 시작 / 종료
    // ========================================================================

    /// 추적 시작
    ///
    /// 반환 시점에는 이미 존재하던 매칭 등록이 전부 리플레이되어
    /// 라이브 목록이 일관된 상태입니다. 디스패치 콜백 안에서는 호출 금지.
    pub async fn start_tracking(self: &Arc<Self>) -> Result<()> {
        {
            let mut inner = self.inner.write().await;
            if inner.tracking {
                return Ok(());
            }
            inner.tracking = true;
            inner.entries.clear();
        }

        let sink = Arc::new(TrackerSink {
            tracker: Arc::downgrade(self),
        });
        *self.sink.write().await = Some(Arc::clone(&sink));

        let weak_listener = {
            let strong: Arc<dyn ServiceListener> = sink;
            Arc::downgrade(&strong)
        };
        let handle = self
            .registry
            .add_weak_listener(None, weak_listener, self.type_tag.clone(), self.filter.clone())
            .await?;

        self.inner.write().await.listener = Some(handle);
        debug!(tracker = %self.describe(), "Started tracking");
        Ok(())
    }

    /// 추적 종료 (멱등)
    ///
    /// 구독을 제거하고 라이브 목록을 비웁니다. 이후의 읽기는 stale 데이터가
    /// 아니라 빈 결과를 반환합니다.
    pub async fn stop_tracking(&self) {
        let handle = {
            let mut inner = self.inner.write().await;
            if !inner.tracking {
                return;
            }
            inner.tracking = false;
            inner.entries.clear();
            inner.listener.take()
        };

        if let Some(handle) = handle {
            handle.unregister();
        }
        *self.sink.write().await = None;
        debug!(tracker = %self.describe(), "Stopped tracking");
    }

    pub async fn is_tracking(&self) -> bool {
        self.inner.read().await.tracking
    }

    // ========================================================================
    // 읽기 (방어적 복사)
    // ========================================================================

    /// 매칭 등록 목록 (선택 순서)
    pub async fn get_registrations(&self) -> Vec<ServiceRegistration> {
        let inner = self.inner.read().await;
        inner
            .entries
            .iter()
            .map(|entry| entry.registration.clone())
            .collect()
    }

    /// 매칭 인스턴스 목록 (선택 순서)
    pub async fn get_services(&self) -> Vec<ServiceInstance> {
        let inner = self.inner.read().await;
        inner
            .entries
            .iter()
            .map(|entry| Arc::clone(&entry.instance))
            .collect()
    }

    /// 전체 엔트리 스냅샷
    pub async fn tracked(&self) -> Vec<TrackedService> {
        self.inner.read().await.entries.clone()
    }

    /// best match 등록
    pub async fn get_registration(&self) -> Option<ServiceRegistration> {
        let inner = self.inner.read().await;
        inner.entries.first().map(|entry| entry.registration.clone())
    }

    /// best match 인스턴스
    pub async fn get_service(&self) -> Option<ServiceInstance> {
        let inner = self.inner.read().await;
        inner.entries.first().map(|entry| Arc::clone(&entry.instance))
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    // ========================================================================
    // 보조 이벤트 핸들러
    // ========================================================================

    /// 보조 핸들러 추가
    ///
    /// 현재 매칭 중인 엔트리를 핸들러에 즉시 리플레이합니다.
    pub async fn add_event_handler(&self, handler: Arc<dyn ServiceListener>) {
        let current = self.tracked().await;
        for entry in &current {
            invoke_guarded(handler.name(), handler.on_registered(&entry.registration)).await;
        }
        self.handlers.write().await.push(handler);
    }

    /// 보조 핸들러 제거 (동일 객체 기준)
    pub async fn remove_event_handler(&self, handler: &Arc<dyn ServiceListener>) {
        let mut handlers = self.handlers.write().await;
        handlers.retain(|existing| !Arc::ptr_eq(existing, handler));
    }

    fn describe(&self) -> String {
        match &self.filter {
            Some(filter) => format!("Tracker[{} {}]", self.type_tag, filter),
            None => format!("Tracker[{}]", self.type_tag),
        }
    }

    // ========================================================================
    // 레지스트리 이벤트 반영 (디스패치 워커에서 호출)
    // ========================================================================

    async fn handle_registered(&self, registration: &ServiceRegistration) {
        let Some(instance) = registration.instance().await else {
            return;
        };
        let ranking = ranking_of(&registration.properties().await);

        let inserted = {
            let mut inner = self.inner.write().await;
            if !inner.tracking {
                return;
            }
            if inner
                .entries
                .iter()
                .any(|entry| entry.registration.id() == registration.id())
            {
                false
            } else {
                let entry = TrackedService {
                    registration: registration.clone(),
                    instance,
                    ranking,
                };
                let position = inner
                    .entries
                    .iter()
                    .position(|existing| selection_cmp(&entry, existing) == Ordering::Less)
                    .unwrap_or(inner.entries.len());
                inner.entries.insert(position, entry);
                true
            }
        };

        if inserted {
            let handlers = self.handlers.read().await.clone();
            for handler in handlers {
                invoke_guarded(handler.name(), handler.on_registered(registration)).await;
            }
        }
    }

    async fn handle_unregistered(
        &self,
        registration: &ServiceRegistration,
        instance: ServiceInstance,
    ) {
        // 콜백이 끝나기 전에 쌍을 목록에서 제거 - 보조 핸들러가 콜백 중에
        // 트래커를 읽어도 해제된 쌍은 더 이상 보이지 않는다
        let removed = {
            let mut inner = self.inner.write().await;
            let before = inner.entries.len();
            inner
                .entries
                .retain(|entry| entry.registration.id() != registration.id());
            inner.entries.len() != before
        };

        if removed {
            let handlers = self.handlers.read().await.clone();
            for handler in handlers {
                invoke_guarded(
                    handler.name(),
                    handler.on_unregistered(registration, Arc::clone(&instance)),
                )
                .await;
            }
        }
    }

    async fn handle_modified(&self, registration: &ServiceRegistration) {
        let ranking = ranking_of(&registration.properties().await);

        let present = {
            let mut inner = self.inner.write().await;
            if !inner.tracking {
                return;
            }
            let mut present = false;
            for entry in inner.entries.iter_mut() {
                if entry.registration.id() == registration.id() {
                    entry.ranking = ranking;
                    present = true;
                }
            }
            if present {
                inner.entries.sort_by(selection_cmp);
            }
            present
        };

        if present {
            let handlers = self.handlers.read().await.clone();
            for handler in handlers {
                invoke_guarded(handler.name(), handler.on_modified(registration)).await;
            }
        }
    }
}

// ============================================================================
// TrackerSink - 레지스트리 구독의 수신 측
// ============================================================================

struct TrackerSink {
    tracker: Weak<ServiceTracker>,
}

#[async_trait]
impl ServiceListener for TrackerSink {
    fn name(&self) -> &str {
        "service-tracker"
    }

    async fn on_registered(&self, registration: &ServiceRegistration) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.handle_registered(registration).await;
        }
    }

    async fn on_unregistered(&self, registration: &ServiceRegistration, instance: ServiceInstance) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.handle_unregistered(registration, instance).await;
        }
    }

    async fn on_modified(&self, registration: &ServiceRegistration) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.handle_modified(registration).await;
        }
    }
}

// ============================================================================
// 테스트
// ============================================================================
