//! ServiceListDependency - 다중 서비스 목록 의존성
//!
//! 카디널리티 하한이 없으므로 추적이 시작되면 항상 만족입니다.
//! 소비자에게는 항상 최신 상태를 반영하는 읽기 전용 뷰를 주입합니다.
//! 뷰는 copy-on-write 스냅샷 교체로 갱신되므로 순회 중에 찢어진 상태를
//! 관찰하는 일이 없고, 변경 API 자체가 존재하지 않습니다.

use crate::dependency::{Dependency, DependencyHost, DependencyState, HostCell, InjectedValue};
use crate::registry::{ServiceListener, ServiceRegistration, ServiceRegistry};
use crate::tracker::{ServiceTracker, TrackedService};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use weft_foundation::{PropertyFilter, Result, ServiceInstance, TypeTag};

// ============================================================================
// ServiceListView - 주입되는 읽기 전용 뷰
// ============================================================================

/// 항상 최신 상태를 반영하는 읽기 전용 서비스 목록 뷰
///
/// 선택 순서(랭킹 내림차순, 최신 우선)로 정렬되어 있습니다.
/// 읽기는 동기식이므로 주입받은 소비자가 요청 처리 경로에서 매번
/// 다시 읽어도 비용이 거의 없습니다.
#[derive(Clone)]
pub struct ServiceListView {
    entries: Arc<parking_lot::RwLock<Arc<Vec<TrackedService>>>>,
}

impl ServiceListView {
    fn new() -> Self {
        Self {
            entries: Arc::new(parking_lot::RwLock::new(Arc::new(Vec::new()))),
        }
    }

    /// 일관된 스냅샷 (순회 중 찢어진 상태 없음)
    pub fn snapshot(&self) -> Arc<Vec<TrackedService>> {
        Arc::clone(&self.entries.read())
    }

    /// 인스턴스 목록 (선택 순서)
    pub fn services(&self) -> Vec<ServiceInstance> {
        self.snapshot()
            .iter()
            .map(|entry| Arc::clone(&entry.instance))
            .collect()
    }

    /// 등록 목록 (선택 순서)
    pub fn registrations(&self) -> Vec<ServiceRegistration> {
        self.snapshot()
            .iter()
            .map(|entry| entry.registration.clone())
            .collect()
    }

    /// best match 인스턴스
    pub fn first(&self) -> Option<ServiceInstance> {
        self.snapshot()
            .first()
            .map(|entry| Arc::clone(&entry.instance))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// 전체 스냅샷 교체 (copy-on-write)
    fn replace(&self, entries: Vec<TrackedService>) {
        *self.entries.write() = Arc::new(entries);
    }
}

impl std::fmt::Debug for ServiceListView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ServiceListView(len={})", self.len())
    }
}

// ============================================================================
// ServiceListDependency
// ============================================================================

/// 다중 서비스 의존성
pub struct ServiceListDependency {
    field: String,
    tracker: Arc<ServiceTracker>,
    view: ServiceListView,
    state: RwLock<DependencyState>,
    host: HostCell,
    sink: Arc<ListSink>,
}

impl ServiceListDependency {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        type_tag: TypeTag,
        filter: Option<PropertyFilter>,
        field: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            field: field.into(),
            tracker: ServiceTracker::new(registry, type_tag, filter),
            view: ServiceListView::new(),
            state: RwLock::new(DependencyState::Stopped),
            host: HostCell::new(),
            sink: Arc::new(ListSink {
                dependency: weak.clone(),
            }),
        })
    }

    /// 주입되는 뷰 (추적 시작 전에도 접근 가능, 빈 목록)
    pub fn view(&self) -> ServiceListView {
        self.view.clone()
    }

    async fn rebuild(&self) {
        if *self.state.read().await == DependencyState::Stopped {
            return;
        }
        // 트래커가 이미 선택 순서를 유지하므로 그대로 스냅샷 교체
        self.view.replace(self.tracker.tracked().await);
    }
}

#[async_trait]
impl Dependency for ServiceListDependency {
    fn field(&self) -> &str {
        &self.field
    }

    fn describe(&self) -> String {
        match self.tracker.filter() {
            Some(filter) => format!(
                "ServiceList[{} {}] for field '{}'",
                self.tracker.type_tag(),
                filter,
                self.field
            ),
            None => format!(
                "ServiceList[{}] for field '{}'",
                self.tracker.type_tag(),
                self.field
            ),
        }
    }

    async fn attach(&self, host: Weak<dyn DependencyHost>) {
        self.host.set(host).await;
    }

    async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != DependencyState::Stopped {
                return Ok(());
            }
            *state = DependencyState::Unsatisfied;
        }

        self.tracker.start_tracking().await?;
        let sink: Arc<dyn ServiceListener> = Arc::clone(&self.sink) as Arc<dyn ServiceListener>;
        self.tracker.add_event_handler(sink).await;
        self.rebuild().await;

        // 카디널리티 하한이 없으므로 추적이 시작된 순간부터 만족
        *self.state.write().await = DependencyState::Satisfied;
        if let Some(host) = self.host.resolve().await {
            host.on_dependency_satisfied().await;
        }
        Ok(())
    }

    async fn stop(&self) {
        {
            let mut state = self.state.write().await;
            if *state == DependencyState::Stopped {
                return;
            }
            *state = DependencyState::Stopped;
        }

        let sink: Arc<dyn ServiceListener> = Arc::clone(&self.sink) as Arc<dyn ServiceListener>;
        self.tracker.remove_event_handler(&sink).await;
        self.tracker.stop_tracking().await;
        self.view.replace(Vec::new());
    }

    async fn state(&self) -> DependencyState {
        *self.state.read().await
    }

    async fn injected_value(&self) -> Option<InjectedValue> {
        if *self.state.read().await == DependencyState::Stopped {
            return None;
        }
        Some(InjectedValue::List(self.view.clone()))
    }
}

struct ListSink {
    dependency: Weak<ServiceListDependency>,
}

#[async_trait]
impl ServiceListener for ListSink {
    fn name(&self) -> &str {
        "service-list-dependency"
    }

    async fn on_registered(&self, _registration: &ServiceRegistration) {
        if let Some(dependency) = self.dependency.upgrade() {
            dependency.rebuild().await;
        }
    }

    async fn on_unregistered(
        &self,
        _registration: &ServiceRegistration,
        _instance: ServiceInstance,
    ) {
        if let Some(dependency) = self.dependency.upgrade() {
            dependency.rebuild().await;
        }
    }

    async fn on_modified(&self, _registration: &ServiceRegistration) {
        if let Some(dependency) = self.dependency.upgrade() {
            dependency.rebuild().await;
        }
    }
}
