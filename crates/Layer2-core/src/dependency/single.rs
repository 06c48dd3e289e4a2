//! ServiceRefDependency - 단일 서비스 참조 (낙관적 선택)
//!
//! required/optional 두 정책을 하나의 구현으로 커버합니다.
//! 여러 등록이 매칭되면 선택 순서(랭킹 내림차순, 최신 우선)의 best match를
//! 주입하며, best match가 바뀌거나 프로퍼티가 수정되면 재주입합니다.

use crate::dependency::{
    same_instance, Dependency, DependencyHost, DependencyState, HostCell, InjectedValue,
};
use crate::registry::{ServiceListener, ServiceRegistration, ServiceRegistry};
use crate::tracker::ServiceTracker;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use weft_foundation::{PropertyFilter, Result, ServiceInstance, TypeTag};

/// 단일 서비스 의존성
///
/// - `required`: 트래커가 비어있지 않아야 만족
/// - `optional`: 항상 만족, 매칭이 있으면 주입
pub struct ServiceRefDependency {
    field: String,
    required: bool,
    tracker: Arc<ServiceTracker>,
    state: RwLock<DependencyState>,
    injected: RwLock<Option<ServiceInstance>>,
    host: HostCell,
    sink: Arc<RefSink>,
}

impl ServiceRefDependency {
    /// 필수 단일 서비스 의존성 생성
    pub fn required(
        registry: Arc<ServiceRegistry>,
        type_tag: TypeTag,
        filter: Option<PropertyFilter>,
        field: impl Into<String>,
    ) -> Arc<Self> {
        Self::new(registry, type_tag, filter, field, true)
    }

    /// 선택적 단일 서비스 의존성 생성
    pub fn optional(
        registry: Arc<ServiceRegistry>,
        type_tag: TypeTag,
        filter: Option<PropertyFilter>,
        field: impl Into<String>,
    ) -> Arc<Self> {
        Self::new(registry, type_tag, filter, field, false)
    }

    fn new(
        registry: Arc<ServiceRegistry>,
        type_tag: TypeTag,
        filter: Option<PropertyFilter>,
        field: impl Into<String>,
        required: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            field: field.into(),
            required,
            tracker: ServiceTracker::new(registry, type_tag, filter),
            state: RwLock::new(DependencyState::Stopped),
            injected: RwLock::new(None),
            host: HostCell::new(),
            sink: Arc::new(RefSink {
                dependency: weak.clone(),
            }),
        })
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// 트래커 상태로부터 만족/주입 값을 재계산
    async fn refresh(&self, force_inject: bool) {
        if *self.state.read().await == DependencyState::Stopped {
            return;
        }

        let best = self.tracker.get_service().await;
        let satisfied = !self.required || best.is_some();

        let value_changed = {
            let mut injected = self.injected.write().await;
            let changed = force_inject || !same_instance(injected.as_ref(), best.as_ref());
            *injected = best;
            changed
        };

        let previous = {
            let mut state = self.state.write().await;
            if *state == DependencyState::Stopped {
                return;
            }
            let previous = *state;
            *state = if satisfied {
                DependencyState::Satisfied
            } else {
                DependencyState::Unsatisfied
            };
            previous
        };

        let Some(host) = self.host.resolve().await else {
            return;
        };
        match (previous, satisfied) {
            (DependencyState::Unsatisfied, true) => host.on_dependency_satisfied().await,
            (DependencyState::Satisfied, false) => host.on_dependency_unsatisfied().await,
            (DependencyState::Satisfied, true) if value_changed => {
                host.on_injection_changed(&self.field).await
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Dependency for ServiceRefDependency {
    fn field(&self) -> &str {
        &self.field
    }

    fn describe(&self) -> String {
        let kind = if self.required {
            "ServiceRef"
        } else {
            "OptionalServiceRef"
        };
        match self.tracker.filter() {
            Some(filter) => format!(
                "{}[{} {}] for field '{}'",
                kind,
                self.tracker.type_tag(),
                filter,
                self.field
            ),
            None => format!(
                "{}[{}] for field '{}'",
                kind,
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

        // 리플레이 이벤트가 없었던 경우(빈 트래커의 optional 등)를 위한 초기 평가
        self.refresh(false).await;
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
        *self.injected.write().await = None;
    }

    async fn state(&self) -> DependencyState {
        *self.state.read().await
    }

    async fn injected_value(&self) -> Option<InjectedValue> {
        self.injected
            .read()
            .await
            .as_ref()
            .map(|instance| InjectedValue::Instance(Arc::clone(instance)))
    }
}

struct RefSink {
    dependency: Weak<ServiceRefDependency>,
}

#[async_trait]
impl ServiceListener for RefSink {
    fn name(&self) -> &str {
        "service-ref-dependency"
    }

    async fn on_registered(&self, _registration: &ServiceRegistration) {
        if let Some(dependency) = self.dependency.upgrade() {
            dependency.refresh(false).await;
        }
    }

    async fn on_unregistered(
        &self,
        _registration: &ServiceRegistration,
        _instance: ServiceInstance,
    ) {
        if let Some(dependency) = self.dependency.upgrade() {
            dependency.refresh(false).await;
        }
    }

    async fn on_modified(&self, _registration: &ServiceRegistration) {
        // 매칭은 유지된 채 메타데이터만 바뀐 경우에도 재주입해
        // 소비자가 프로퍼티 변경을 관찰할 수 있게 한다
        if let Some(dependency) = self.dependency.upgrade() {
            dependency.refresh(true).await;
        }
    }
}
