//! ExactlyOneDependency - 단일 서비스 참조 (비관적 선택)
//!
//! 낙관적 변형의 엄격한 대안입니다. 동시에 두 개 이상의 매칭이 나타나면
//! 랭킹으로 암묵적으로 고르는 대신 만족을 철회해 소유 모듈을 비활성화합니다.
//! 배타적 자원처럼 임의 선택이 위험한 곳에 사용합니다.

use crate::dependency::{
    same_instance, Dependency, DependencyHost, DependencyState, HostCell, InjectedValue,
};
use crate::registry::{ServiceListener, ServiceRegistration, ServiceRegistry};
use crate::tracker::ServiceTracker;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::warn;
use weft_foundation::{PropertyFilter, Result, ServiceInstance, TypeTag};

/// 정확히 하나의 매칭을 요구하는 의존성
///
/// 만족 조건: `!required || 매칭 수 == 1`. 모호성(>1)은 예외가 아니라
/// 모듈 비활성화로 표면화됩니다. 매칭을 하나로 줄이면 만족이 복구됩니다.
pub struct ExactlyOneDependency {
    field: String,
    required: bool,
    tracker: Arc<ServiceTracker>,
    state: RwLock<DependencyState>,
    injected: RwLock<Option<ServiceInstance>>,
    host: HostCell,
    sink: Arc<ExactlyOneSink>,
}

impl ExactlyOneDependency {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        type_tag: TypeTag,
        filter: Option<PropertyFilter>,
        field: impl Into<String>,
    ) -> Arc<Self> {
        Self::with_required(registry, type_tag, filter, field, true)
    }

    pub fn with_required(
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
            sink: Arc::new(ExactlyOneSink {
                dependency: weak.clone(),
            }),
        })
    }

    async fn refresh(&self) {
        if *self.state.read().await == DependencyState::Stopped {
            return;
        }

        let matches = self.tracker.len().await;
        let satisfied = !self.required || matches == 1;

        // 모호하면 아무것도 주입하지 않는다 - 임의 선택 금지
        let sole = if matches == 1 {
            self.tracker.get_service().await
        } else {
            None
        };

        if matches > 1 {
            warn!(
                dependency = %self.describe(),
                matches = matches,
                "Dependency became ambiguous"
            );
        }

        let value_changed = {
            let mut injected = self.injected.write().await;
            let changed = !same_instance(injected.as_ref(), sole.as_ref());
            *injected = sole;
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
impl Dependency for ExactlyOneDependency {
    fn field(&self) -> &str {
        &self.field
    }

    fn describe(&self) -> String {
        match self.tracker.filter() {
            Some(filter) => format!(
                "ServiceRefExactlyOne[{} {}] for field '{}'",
                self.tracker.type_tag(),
                filter,
                self.field
            ),
            None => format!(
                "ServiceRefExactlyOne[{}] for field '{}'",
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
        self.refresh().await;
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

struct ExactlyOneSink {
    dependency: Weak<ExactlyOneDependency>,
}

#[async_trait]
impl ServiceListener for ExactlyOneSink {
    fn name(&self) -> &str {
        "exactly-one-dependency"
    }

    async fn on_registered(&self, _registration: &ServiceRegistration) {
        if let Some(dependency) = self.dependency.upgrade() {
            dependency.refresh().await;
        }
    }

    async fn on_unregistered(
        &self,
        _registration: &ServiceRegistration,
        _instance: ServiceInstance,
    ) {
        if let Some(dependency) = self.dependency.upgrade() {
            dependency.refresh().await;
        }
    }

    async fn on_modified(&self, _registration: &ServiceRegistration) {
        if let Some(dependency) = self.dependency.upgrade() {
            dependency.refresh().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::test_support::RecordingHost;

    fn tag() -> TypeTag {
        TypeTag::new("exclusive.resource")
    }

    #[tokio::test]
    async fn test_ambiguity_forces_unsatisfaction() {
        let registry = Arc::new(ServiceRegistry::new());
        let host = RecordingHost::new();

        let dependency = ExactlyOneDependency::new(Arc::clone(&registry), tag(), None, "lock");
        dependency.attach(host.as_host()).await;
        dependency.start().await.unwrap();
        assert_eq!(dependency.state().await, DependencyState::Unsatisfied);

        // 1개 매칭 → Satisfied
        let first = registry.register(None, tag(), Arc::new("first".to_string()), Default::default());
        registry.settle().await;
        assert_eq!(dependency.state().await, DependencyState::Satisfied);
        assert_eq!(host.satisfied_count(), 1);

        // 2개째 매칭 → 모호성 → Unsatisfied (랭킹으로 해소하지 않음)
        let second =
            registry.register(None, tag(), Arc::new("second".to_string()), Default::default());
        registry.settle().await;
        assert_eq!(dependency.state().await, DependencyState::Unsatisfied);
        assert_eq!(host.unsatisfied_count(), 1);
        assert!(dependency.injected_value().await.is_none());

        // 어느 쪽이든 하나를 제거하면 만족 복구
        first.unregister();
        registry.settle().await;
        assert_eq!(dependency.state().await, DependencyState::Satisfied);
        assert_eq!(host.satisfied_count(), 2);
        assert_eq!(
            *dependency.injected_value().await.unwrap().downcast::<String>().unwrap(),
            "second"
        );

        // 남은 하나까지 제거하면 다시 Unsatisfied
        second.unregister();
        registry.settle().await;
        assert_eq!(dependency.state().await, DependencyState::Unsatisfied);
        assert_eq!(host.unsatisfied_count(), 2);
    }

    #[tokio::test]
    async fn test_non_required_never_blocks_activation() {
        let registry = Arc::new(ServiceRegistry::new());
        let host = RecordingHost::new();

        let dependency =
            ExactlyOneDependency::with_required(Arc::clone(&registry), tag(), None, "lock", false);
        dependency.attach(host.as_host()).await;
        dependency.start().await.unwrap();

        // required=false면 매칭 수와 무관하게 Satisfied
        assert_eq!(dependency.state().await, DependencyState::Satisfied);

        registry.register(None, tag(), Arc::new(1u32), Default::default());
        registry.register(None, tag(), Arc::new(2u32), Default::default());
        registry.settle().await;

        assert_eq!(dependency.state().await, DependencyState::Satisfied);
        // 모호한 동안은 아무것도 주입하지 않음
        assert!(dependency.injected_value().await.is_none());
    }
}
