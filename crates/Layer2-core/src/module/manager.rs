//! ModuleManager - 모듈 설치/시작/종료 관리
//!
//! 이름으로 모듈을 소유하고, 라이프사이클 이벤트를 브로드캐스트합니다.

use crate::dependency::InjectedValue;
use crate::module::{Module, ModuleEvent, ModuleEventKind};
use crate::registry::ServiceRegistry;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};
use weft_foundation::{Error, ModuleId, Result};

/// 모듈 매니저 설정
#[derive(Debug, Clone)]
pub struct ModuleManagerConfig {
    /// 이벤트 채널 용량
    pub event_channel_capacity: usize,

    /// start_all에서 오류 시 계속 진행
    pub continue_on_error: bool,
}

impl Default for ModuleManagerConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: 256,
            continue_on_error: true,
        }
    }
}

/// 모듈 매니저
///
/// ## 사용 예시
///
/// ```ignore
/// let registry = Arc::new(ServiceRegistry::new());
/// let manager = ModuleManager::new(Arc::clone(&registry));
///
/// manager.install(Module::new("db", Arc::clone(&registry))).await?;
/// manager.install(Module::new("web", Arc::clone(&registry))).await?;
///
/// manager.start_all().await;
/// ```
pub struct ModuleManager {
    registry: Arc<ServiceRegistry>,
    modules: RwLock<Vec<Arc<Module>>>,
    events: broadcast::Sender<ModuleEvent>,
    config: ModuleManagerConfig,
}

impl ModuleManager {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self::with_config(registry, ModuleManagerConfig::default())
    }

    pub fn with_config(registry: Arc<ServiceRegistry>, config: ModuleManagerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        Self {
            registry,
            modules: RwLock::new(Vec::new()),
            events,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    // ========================================================================
    // 설치 / 제거
    // ========================================================================

    /// 모듈 설치
    ///
    /// 같은 이름의 모듈이 이미 있으면 에러입니다.
    pub async fn install(&self, module: Arc<Module>) -> Result<()> {
        {
            let mut modules = self.modules.write().await;
            if modules.iter().any(|existing| existing.id() == module.id()) {
                return Err(Error::Module(format!(
                    "module '{}' is already installed",
                    module.id()
                )));
            }
            module.bind_events(self.events.clone()).await;
            modules.push(Arc::clone(&module));
        }

        info!(module = %module.id(), "Installed module");
        let _ = self
            .events
            .send(ModuleEvent::new(ModuleEventKind::Installed, module.id()));
        Ok(())
    }

    /// 모듈 제거 (먼저 정지시킴)
    pub async fn remove(&self, id: &ModuleId) -> Result<()> {
        let module = {
            let mut modules = self.modules.write().await;
            let position = modules.iter().position(|m| m.id() == id);
            match position {
                Some(position) => modules.remove(position),
                None => return Err(Error::ModuleNotFound(id.to_string())),
            }
        };

        module.stop().await;
        info!(module = %id, "Removed module");
        let _ = self
            .events
            .send(ModuleEvent::new(ModuleEventKind::Removed, id));
        Ok(())
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub async fn get(&self, id: &ModuleId) -> Option<Arc<Module>> {
        let modules = self.modules.read().await;
        modules.iter().find(|m| m.id() == id).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<Module>> {
        self.modules.read().await.clone()
    }

    pub async fn module_count(&self) -> usize {
        self.modules.read().await.len()
    }

    /// 모듈 필드의 주입 값 룩업 - 코드 생성 레이어의 진입점
    pub async fn instance_value(&self, id: &ModuleId, field: &str) -> Option<InjectedValue> {
        let module = self.get(id).await?;
        module.instance_value(field).await
    }

    // ========================================================================
    // 라이프사이클
    // ========================================================================

    /// 모듈 하나 시작
    pub async fn start(&self, id: &ModuleId) -> Result<()> {
        let module = self
            .get(id)
            .await
            .ok_or_else(|| Error::ModuleNotFound(id.to_string()))?;
        module.start().await
    }

    /// 모듈 하나 정지
    pub async fn stop(&self, id: &ModuleId) -> Result<()> {
        let module = self
            .get(id)
            .await
            .ok_or_else(|| Error::ModuleNotFound(id.to_string()))?;
        module.stop().await;
        Ok(())
    }

    /// 전체 시작 (설치 순서)
    pub async fn start_all(&self) -> Result<()> {
        let modules = self.list().await;
        for module in modules {
            if let Err(e) = module.start().await {
                if self.config.continue_on_error {
                    warn!(
                        module = %module.id(),
                        error = %e,
                        "Module failed to start. Continuing anyway."
                    );
                } else {
                    error!(module = %module.id(), error = %e, "Module failed to start");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// 전체 정지 (설치 역순)
    pub async fn stop_all(&self) {
        let modules = self.list().await;
        for module in modules.iter().rev() {
            module.stop().await;
        }
    }

    // ========================================================================
    // 이벤트
    // ========================================================================

    /// 모듈 라이프사이클 이벤트 구독
    pub fn subscribe(&self) -> broadcast::Receiver<ModuleEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::ServiceRefDependency;
    use std::sync::Arc;
    use weft_foundation::TypeTag;

    #[tokio::test]
    async fn test_install_and_duplicate_rejection() {
        let registry = Arc::new(ServiceRegistry::new());
        let manager = ModuleManager::new(Arc::clone(&registry));

        manager
            .install(Module::new("web", Arc::clone(&registry)))
            .await
            .unwrap();
        assert_eq!(manager.module_count().await, 1);

        let duplicate = manager
            .install(Module::new("web", Arc::clone(&registry)))
            .await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_start_unknown_module() {
        let registry = Arc::new(ServiceRegistry::new());
        let manager = ModuleManager::new(registry);

        let result = manager.start(&"ghost".into()).await;
        assert!(matches!(result, Err(Error::ModuleNotFound(_))));
    }

    #[tokio::test]
    async fn test_lifecycle_event_stream() {
        let registry = Arc::new(ServiceRegistry::new());
        let manager = ModuleManager::new(Arc::clone(&registry));
        let mut events = manager.subscribe();

        let module = Module::new("web", Arc::clone(&registry));
        module
            .add_dependency(ServiceRefDependency::required(
                Arc::clone(&registry),
                TypeTag::new("dep"),
                None,
                "dep",
            ))
            .await
            .unwrap();

        manager.install(module).await.unwrap();
        manager.start(&"web".into()).await.unwrap();

        registry.register(None, TypeTag::new("dep"), Arc::new(1u32), Default::default());
        registry.settle().await;

        manager.stop(&"web".into()).await.unwrap();
        manager.remove(&"web".into()).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.module, "web");
            kinds.push(event.kind);
        }
        assert_eq!(
            kinds,
            vec![
                ModuleEventKind::Installed,
                ModuleEventKind::Started,
                ModuleEventKind::Activated,
                ModuleEventKind::Deactivated,
                ModuleEventKind::Stopped,
                ModuleEventKind::Removed,
            ]
        );
    }

    #[tokio::test]
    async fn test_start_all_continues_on_error() {
        let registry = Arc::new(ServiceRegistry::new());
        let manager = ModuleManager::new(Arc::clone(&registry));

        manager
            .install(Module::new("a", Arc::clone(&registry)))
            .await
            .unwrap();
        manager
            .install(Module::new("b", Arc::clone(&registry)))
            .await
            .unwrap();

        manager.start_all().await.unwrap();

        for module in manager.list().await {
            assert!(module.is_active().await);
        }

        manager.stop_all().await;
        for module in manager.list().await {
            assert!(!module.is_active().await);
        }
    }

    #[tokio::test]
    async fn test_instance_value_lookup() {
        let registry = Arc::new(ServiceRegistry::new());
        let manager = ModuleManager::new(Arc::clone(&registry));

        let module = Module::new("web", Arc::clone(&registry));
        module
            .add_dependency(ServiceRefDependency::required(
                Arc::clone(&registry),
                TypeTag::new("dep"),
                None,
                "dep",
            ))
            .await
            .unwrap();
        manager.install(module).await.unwrap();

        registry.register(
            None,
            TypeTag::new("dep"),
            Arc::new("value".to_string()),
            Default::default(),
        );
        registry.settle().await;
        manager.start(&"web".into()).await.unwrap();

        let value = manager.instance_value(&"web".into(), "dep").await.unwrap();
        assert_eq!(*value.downcast::<String>().unwrap(), "value");

        // 알 수 없는 필드/모듈은 에러가 아니라 None
        assert!(manager.instance_value(&"web".into(), "ghost").await.is_none());
        assert!(manager.instance_value(&"ghost".into(), "dep").await.is_none());
    }
}
