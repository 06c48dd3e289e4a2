//! FactoryDependency - 복합 의존성 (팩토리 + 리소스)
//!
//! 팩토리 타입 서비스와 리소스 타입 서비스를 독립된 트래커로 추적하고,
//! 둘 다 존재할 때 팩토리에 리소스를 넘겨 파생 값을 만들어 주입합니다.
//! 추적 중인 두 서비스가 아니라 파생 값이 주입 대상입니다.
//! 어느 한쪽이라도 사라지면 파생 값을 버리고 소유 모듈을 비활성화합니다.

use crate::dependency::{
    same_instance, Dependency, DependencyHost, DependencyState, HostCell, InjectedValue,
};
use crate::registry::{ServiceListener, ServiceRegistration, ServiceRegistry};
use crate::tracker::ServiceTracker;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::error;
use weft_foundation::{downcast_service, PropertyFilter, Result, ServiceInstance, TypeTag};

// ============================================================================
// ServiceFactory - 파생 값 생성 인터페이스
// ============================================================================

/// 리소스로부터 파생 값을 생성하는 팩토리
///
/// 팩토리 서비스는 `factory_service`로 감싸 등록해야 이 의존성이
/// 인스턴스에서 팩토리를 복원할 수 있습니다.
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    async fn create(&self, resource: ServiceInstance) -> Result<ServiceInstance>;
}

/// 팩토리를 레지스트리에 등록 가능한 인스턴스로 포장
pub fn factory_service(factory: Arc<dyn ServiceFactory>) -> ServiceInstance {
    Arc::new(factory)
}

/// 등록된 인스턴스에서 팩토리 복원
fn as_factory(instance: &ServiceInstance) -> Option<Arc<dyn ServiceFactory>> {
    downcast_service::<Arc<dyn ServiceFactory>>(instance).map(|wrapped| Arc::clone(&*wrapped))
}

// ============================================================================
// FactoryDependency
// ============================================================================

/// 복합 의존성 (DAO-ref 패턴)
///
/// 만족 조건: 두 트래커 모두 비어있지 않고, 팩토리 호출이 성공함.
/// 팩토리 호출 실패는 잡아서 로깅하고 Unsatisfied로 보고합니다 -
/// 깨진 생산자 하나가 디스패치 스레드를 불안정하게 만들 수 없습니다.
pub struct FactoryDependency {
    field: String,
    factory_tracker: Arc<ServiceTracker>,
    resource_tracker: Arc<ServiceTracker>,
    state: RwLock<DependencyState>,
    derived: RwLock<Option<ServiceInstance>>,

    /// 마지막으로 선택된 (팩토리, 리소스) - 재구축 필요 판단용
    chosen: RwLock<(Option<ServiceInstance>, Option<ServiceInstance>)>,
    host: HostCell,
    sink: Arc<CompoundSink>,
}

impl FactoryDependency {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        factory_tag: TypeTag,
        resource_tag: TypeTag,
        resource_filter: Option<PropertyFilter>,
        field: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            field: field.into(),
            factory_tracker: ServiceTracker::new(Arc::clone(&registry), factory_tag, None),
            resource_tracker: ServiceTracker::new(registry, resource_tag, resource_filter),
            state: RwLock::new(DependencyState::Stopped),
            derived: RwLock::new(None),
            chosen: RwLock::new((None, None)),
            host: HostCell::new(),
            sink: Arc::new(CompoundSink {
                dependency: weak.clone(),
            }),
        })
    }

    async fn refresh(&self) {
        if *self.state.read().await == DependencyState::Stopped {
            return;
        }

        let factory_instance = self.factory_tracker.get_service().await;
        let resource_instance = self.resource_tracker.get_service().await;

        let selection_changed = {
            let mut chosen = self.chosen.write().await;
            let changed = !same_instance(chosen.0.as_ref(), factory_instance.as_ref())
                || !same_instance(chosen.1.as_ref(), resource_instance.as_ref());
            *chosen = (factory_instance.clone(), resource_instance.clone());
            changed
        };

        let satisfied = match (factory_instance, resource_instance) {
            (Some(factory_instance), Some(resource_instance)) => {
                let needs_build = selection_changed || self.derived.read().await.is_none();
                if needs_build {
                    self.build_derived(&factory_instance, resource_instance).await
                } else {
                    true
                }
            }
            _ => {
                *self.derived.write().await = None;
                false
            }
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
            (DependencyState::Satisfied, true) if selection_changed => {
                host.on_injection_changed(&self.field).await
            }
            _ => {}
        }
    }

    /// 파생 값 생성. 실패는 격리하고 false 반환.
    async fn build_derived(
        &self,
        factory_instance: &ServiceInstance,
        resource_instance: ServiceInstance,
    ) -> bool {
        let Some(factory) = as_factory(factory_instance) else {
            error!(
                dependency = %self.describe(),
                "Tracked factory service is not a ServiceFactory"
            );
            *self.derived.write().await = None;
            return false;
        };

        match factory.create(resource_instance).await {
            Ok(value) => {
                *self.derived.write().await = Some(value);
                true
            }
            Err(e) => {
                error!(
                    dependency = %self.describe(),
                    error = %e,
                    "Derived value construction failed"
                );
                *self.derived.write().await = None;
                false
            }
        }
    }
}

#[async_trait]
impl Dependency for FactoryDependency {
    fn field(&self) -> &str {
        &self.field
    }

    fn describe(&self) -> String {
        format!(
            "FactoryRef[{} + {}] for field '{}'",
            self.factory_tracker.type_tag(),
            self.resource_tracker.type_tag(),
            self.field
        )
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

        self.factory_tracker.start_tracking().await?;
        self.resource_tracker.start_tracking().await?;

        let sink: Arc<dyn ServiceListener> = Arc::clone(&self.sink) as Arc<dyn ServiceListener>;
        self.factory_tracker.add_event_handler(Arc::clone(&sink)).await;
        self.resource_tracker.add_event_handler(sink).await;

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
        self.resource_tracker.remove_event_handler(&sink).await;
        self.factory_tracker.remove_event_handler(&sink).await;
        self.resource_tracker.stop_tracking().await;
        self.factory_tracker.stop_tracking().await;

        *self.derived.write().await = None;
        *self.chosen.write().await = (None, None);
    }

    async fn state(&self) -> DependencyState {
        *self.state.read().await
    }

    async fn injected_value(&self) -> Option<InjectedValue> {
        self.derived
            .read()
            .await
            .as_ref()
            .map(|instance| InjectedValue::Instance(Arc::clone(instance)))
    }
}

struct CompoundSink {
    dependency: Weak<FactoryDependency>,
}

#[async_trait]
impl ServiceListener for CompoundSink {
    fn name(&self) -> &str {
        "factory-dependency"
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
        // 랭킹 변경으로 best match가 바뀌었을 수 있음
        if let Some(dependency) = self.dependency.upgrade() {
            dependency.refresh().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::test_support::RecordingHost;
    use weft_foundation::Error;

    fn factory_tag() -> TypeTag {
        TypeTag::new("dao.factory")
    }

    fn resource_tag() -> TypeTag {
        TypeTag::new("data.source")
    }

    /// 리소스 문자열에 접두사를 붙인 파생 값을 만드는 팩토리
    struct PrefixFactory;

    #[async_trait]
    impl ServiceFactory for PrefixFactory {
        async fn create(&self, resource: ServiceInstance) -> Result<ServiceInstance> {
            let source = downcast_service::<String>(&resource)
                .ok_or_else(|| Error::injection("dao", "resource is not a String"))?;
            Ok(Arc::new(format!("dao:{}", source)))
        }
    }

    /// 항상 실패하는 팩토리
    struct FailingFactory;

    #[async_trait]
    impl ServiceFactory for FailingFactory {
        async fn create(&self, _resource: ServiceInstance) -> Result<ServiceInstance> {
            Err(Error::injection("dao", "factory exploded"))
        }
    }

    #[tokio::test]
    async fn test_satisfied_only_when_both_present() {
        let registry = Arc::new(ServiceRegistry::new());
        let host = RecordingHost::new();

        let dependency = FactoryDependency::new(
            Arc::clone(&registry),
            factory_tag(),
            resource_tag(),
            None,
            "dao",
        );
        dependency.attach(host.as_host()).await;
        dependency.start().await.unwrap();
        assert_eq!(dependency.state().await, DependencyState::Unsatisfied);

        // 팩토리만으로는 부족
        registry.register(
            None,
            factory_tag(),
            factory_service(Arc::new(PrefixFactory)),
            Default::default(),
        );
        registry.settle().await;
        assert_eq!(dependency.state().await, DependencyState::Unsatisfied);

        // 리소스까지 생기면 파생 값을 만들어 주입
        let resource = registry.register(
            None,
            resource_tag(),
            Arc::new("orders-db".to_string()),
            Default::default(),
        );
        registry.settle().await;
        assert_eq!(dependency.state().await, DependencyState::Satisfied);
        assert_eq!(host.satisfied_count(), 1);

        let derived = dependency.injected_value().await.unwrap();
        assert_eq!(*derived.downcast::<String>().unwrap(), "dao:orders-db");

        // 리소스가 사라지면 파생 값을 버리고 비활성화 요구
        resource.unregister();
        registry.settle().await;
        assert_eq!(dependency.state().await, DependencyState::Unsatisfied);
        assert_eq!(host.unsatisfied_count(), 1);
        assert!(dependency.injected_value().await.is_none());
    }

    #[tokio::test]
    async fn test_factory_failure_reports_unsatisfied() {
        let registry = Arc::new(ServiceRegistry::new());
        let host = RecordingHost::new();

        let dependency = FactoryDependency::new(
            Arc::clone(&registry),
            factory_tag(),
            resource_tag(),
            None,
            "dao",
        );
        dependency.attach(host.as_host()).await;
        dependency.start().await.unwrap();

        registry.register(
            None,
            factory_tag(),
            factory_service(Arc::new(FailingFactory)),
            Default::default(),
        );
        registry.register(
            None,
            resource_tag(),
            Arc::new("orders-db".to_string()),
            Default::default(),
        );
        registry.settle().await;

        // 팩토리 실패는 전파되지 않고 Unsatisfied로 보고
        assert_eq!(dependency.state().await, DependencyState::Unsatisfied);
        assert_eq!(host.satisfied_count(), 0);
        assert!(dependency.injected_value().await.is_none());
    }

    #[tokio::test]
    async fn test_derived_value_rebuilt_on_replacement() {
        let registry = Arc::new(ServiceRegistry::new());
        let host = RecordingHost::new();

        let dependency = FactoryDependency::new(
            Arc::clone(&registry),
            factory_tag(),
            resource_tag(),
            None,
            "dao",
        );
        dependency.attach(host.as_host()).await;
        dependency.start().await.unwrap();

        registry.register(
            None,
            factory_tag(),
            factory_service(Arc::new(PrefixFactory)),
            Default::default(),
        );
        let old_resource = registry.register(
            None,
            resource_tag(),
            Arc::new("old-db".to_string()),
            Default::default(),
        );
        registry.settle().await;
        assert_eq!(
            *dependency.injected_value().await.unwrap().downcast::<String>().unwrap(),
            "dao:old-db"
        );

        // 리소스 교체: 새 리소스 등록 후 이전 제거
        registry.register(
            None,
            resource_tag(),
            Arc::new("new-db".to_string()),
            Default::default(),
        );
        old_resource.unregister();
        registry.settle().await;

        assert_eq!(dependency.state().await, DependencyState::Satisfied);
        assert_eq!(
            *dependency.injected_value().await.unwrap().downcast::<String>().unwrap(),
            "dao:new-db"
        );
        // 만족은 한 번만, 교체는 주입 변경으로 통지
        assert_eq!(host.satisfied_count(), 1);
        assert!(host.injections.lock().await.contains(&"dao".to_string()));
    }

    #[tokio::test]
    async fn test_stop_discards_derived_value() {
        let registry = Arc::new(ServiceRegistry::new());

        let dependency = FactoryDependency::new(
            Arc::clone(&registry),
            factory_tag(),
            resource_tag(),
            None,
            "dao",
        );
        dependency.start().await.unwrap();

        registry.register(
            None,
            factory_tag(),
            factory_service(Arc::new(PrefixFactory)),
            Default::default(),
        );
        registry.register(
            None,
            resource_tag(),
            Arc::new("db".to_string()),
            Default::default(),
        );
        registry.settle().await;
        assert!(dependency.injected_value().await.is_some());

        dependency.stop().await;
        dependency.stop().await;

        assert_eq!(dependency.state().await, DependencyState::Stopped);
        assert!(dependency.injected_value().await.is_none());
    }
}
