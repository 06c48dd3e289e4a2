//! # Module Lifecycle
//!
//! 의존성 집합의 만족 여부로 모듈의 활성화를 게이트
//!
//! ## 개요
//!
//! Module은 자신의 컴포넌트가 요구하는 Dependency들을 집계합니다.
//! 모든 의존성이 만족이고 모듈이 `Started` 상태일 때만 활성화되며
//! (컴포넌트 주입 + 활성화 훅 실행), 활성 중에 의존성 하나라도 만족이
//! 깨지면 즉시 비활성화됩니다 (활성화의 역순으로 해제).
//!
//! ## 상태 기계
//!
//! ```text
//! Installed --start()--> Starting --> Started --activate_if_ready()--> Activating --> Active
//!     ▲                                  ▲                                              │
//!     │                                  └──────────── deactivate() ◄──────────────────┘
//!     └───────────────── stop() ─────────┘
//! ```

mod manager;

pub use manager::{ModuleManager, ModuleManagerConfig};

use crate::dependency::{Dependency, DependencyHost, InjectedValue};
use crate::registry::ServiceRegistry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, trace};
use weft_foundation::{Error, ModuleId, Result};

// ============================================================================
// ModuleState
// ============================================================================

/// 모듈 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleState {
    /// 설치됨 (시작 전)
    Installed,

    /// 의존성 시작 중
    Starting,

    /// 시작됨 (활성화 대기)
    Started,

    /// 활성화 진행 중
    Activating,

    /// 활성화됨
    Active,

    /// 비활성화 진행 중
    Deactivating,

    /// 종료 진행 중
    Stopping,
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Installed => write!(f, "installed"),
            Self::Starting => write!(f, "starting"),
            Self::Started => write!(f, "started"),
            Self::Activating => write!(f, "activating"),
            Self::Active => write!(f, "active"),
            Self::Deactivating => write!(f, "deactivating"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

// ============================================================================
// ModuleEvent
// ============================================================================

/// 모듈 라이프사이클 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleEvent {
    pub kind: ModuleEventKind,
    pub module: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleEventKind {
    Installed,
    Started,
    Activated,
    Deactivated,
    Stopped,
    Removed,
}

impl ModuleEvent {
    pub(crate) fn new(kind: ModuleEventKind, module: &ModuleId) -> Self {
        Self {
            kind,
            module: module.to_string(),
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// ComponentContext / ModuleComponent
// ============================================================================

/// 컴포넌트 훅에 전달되는 컨텍스트
///
/// 활성화 시점의 주입 값 스냅샷과 레지스트리 접근을 제공합니다.
/// 컴포넌트는 여기서 자신이 공표할 서비스를 등록할 수 있습니다.
pub struct ComponentContext {
    module: ModuleId,
    registry: Arc<ServiceRegistry>,
    values: HashMap<String, InjectedValue>,
}

impl ComponentContext {
    /// 소유 모듈 ID
    pub fn module_id(&self) -> &ModuleId {
        &self.module
    }

    /// 서비스 레지스트리
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// 필드의 주입 값
    pub fn value(&self, field: &str) -> Option<&InjectedValue> {
        self.values.get(field)
    }

    /// 단일 값 주입을 구체 타입으로 조회
    pub fn instance<T: Send + Sync + 'static>(&self, field: &str) -> Option<Arc<T>> {
        self.values.get(field).and_then(InjectedValue::downcast)
    }

    /// 목록 주입 조회
    pub fn list(&self, field: &str) -> Option<crate::dependency::ServiceListView> {
        self.values
            .get(field)
            .and_then(InjectedValue::as_list)
            .cloned()
    }

    /// 주입된 필드 이름들
    pub fn fields(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }
}

/// 모듈 컴포넌트 라이프사이클 훅
///
/// 훅은 디스패치 워커에서 실행될 수 있으므로 안에서 `settle()`이나
/// 리스너/트래커 시작처럼 디스패치 완료를 기다리는 호출을 하면 안 됩니다.
/// 서비스 등록/해제는 큐에 적재만 하므로 안전합니다.
#[async_trait]
pub trait ModuleComponent: Send + Sync {
    /// 컴포넌트 이름 (로깅용)
    fn name(&self) -> &str;

    /// 활성화: 컴포넌트 구성
    async fn on_activate(&self, ctx: &ComponentContext) -> Result<()>;

    /// 활성화 완료 후 호출
    async fn on_initialized(&self, _ctx: &ComponentContext) -> Result<()> {
        Ok(())
    }

    /// 주입 값 변경 통지
    ///
    /// 활성화 중에는 각 의존성에 대해 호출되고, 활성 상태에서 best match
    /// 교체나 프로퍼티 변경이 있으면 다시 호출됩니다. `None`은 제거를 뜻합니다.
    async fn on_inject(&self, _field: &str, _value: Option<InjectedValue>) {}

    /// 비활성화: 주입 값 제거 전에 호출
    async fn on_deactivate(&self, _ctx: &ComponentContext) {}
}

// ============================================================================
// Module
// ============================================================================

/// 모듈 - 의존성 집계와 활성화 게이트
///
/// ## 사용 예시
///
/// ```ignore
/// let registry = Arc::new(ServiceRegistry::new());
/// let module = Module::new("web", Arc::clone(&registry));
///
/// module.add_dependency(ServiceRefDependency::required(
///     Arc::clone(&registry),
///     TypeTag::new("http.router"),
///     None,
///     "router",
/// )).await?;
/// module.set_component(Arc::new(WebComponent::new())).await?;
///
/// module.start().await?;   // 의존성이 모두 만족이면 바로 ACTIVE
/// ```
pub struct Module {
    id: ModuleId,
    registry: Arc<ServiceRegistry>,
    state: RwLock<ModuleState>,
    dependencies: RwLock<Vec<Arc<dyn Dependency>>>,
    component: RwLock<Option<Arc<dyn ModuleComponent>>>,
    events: RwLock<Option<broadcast::Sender<ModuleEvent>>>,

    /// 활성화/비활성화 직렬화
    activation: Mutex<()>,
}

impl Module {
    pub fn new(id: impl Into<ModuleId>, registry: Arc<ServiceRegistry>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            registry,
            state: RwLock::new(ModuleState::Installed),
            dependencies: RwLock::new(Vec::new()),
            component: RwLock::new(None),
            events: RwLock::new(None),
            activation: Mutex::new(()),
        })
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub async fn state(&self) -> ModuleState {
        *self.state.read().await
    }

    pub async fn is_active(&self) -> bool {
        *self.state.read().await == ModuleState::Active
    }

    pub async fn dependency_count(&self) -> usize {
        self.dependencies.read().await.len()
    }

    /// 모듈 이벤트 송신자 연결 (ModuleManager가 install 시 호출)
    pub(crate) async fn bind_events(&self, sender: broadcast::Sender<ModuleEvent>) {
        *self.events.write().await = Some(sender);
    }

    async fn emit(&self, kind: ModuleEventKind) {
        if let Some(sender) = self.events.read().await.as_ref() {
            let _ = sender.send(ModuleEvent::new(kind, &self.id));
        }
    }

    // ========================================================================
    // 구성 (시작 전)
    // ========================================================================

    /// 의존성 추가
    ///
    /// `Installed` 상태에서만 허용됩니다. 의존성은 이 모듈을 소유자로
    /// 연결한 뒤 집계 목록에 들어갑니다.
    pub async fn add_dependency(
        self: &Arc<Self>,
        dependency: Arc<dyn Dependency>,
    ) -> Result<()> {
        let state = *self.state.read().await;
        if state != ModuleState::Installed {
            return Err(Error::Module(format!(
                "cannot add dependency to module '{}' in state {}",
                self.id, state
            )));
        }

        let host: Arc<dyn DependencyHost> = Arc::clone(self) as Arc<dyn DependencyHost>;
        dependency.attach(Arc::downgrade(&host)).await;

        trace!(module = %self.id, dependency = %dependency.describe(), "Added dependency");
        self.dependencies.write().await.push(dependency);
        Ok(())
    }

    /// 컴포넌트 설정
    pub async fn set_component(&self, component: Arc<dyn ModuleComponent>) -> Result<()> {
        let state = *self.state.read().await;
        if state == ModuleState::Active || state == ModuleState::Activating {
            return Err(Error::Module(format!(
                "cannot replace component of module '{}' while {}",
                self.id, state
            )));
        }
        *self.component.write().await = Some(component);
        Ok(())
    }

    // ========================================================================
    // 라이프사이클
    // ========================================================================

    /// 모듈 시작: 모든 의존성의 추적을 시작하고, 준비되면 즉시 활성화
    ///
    /// 이미 시작된 모듈에 대해서는 no-op입니다. 의존성 시작이 실패하면
    /// 이미 시작한 의존성을 역순으로 멈추고 `Installed`로 복귀합니다.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != ModuleState::Installed {
                return Ok(());
            }
            *state = ModuleState::Starting;
        }

        info!(module = %self.id, "Starting module");
        let dependencies = self.dependencies.read().await.clone();

        for (index, dependency) in dependencies.iter().enumerate() {
            if let Err(e) = dependency.start().await {
                error!(
                    module = %self.id,
                    dependency = %dependency.describe(),
                    error = %e,
                    "Failed to start dependency"
                );
                for started in dependencies[..index].iter().rev() {
                    started.stop().await;
                }
                *self.state.write().await = ModuleState::Installed;
                return Err(e);
            }
        }

        *self.state.write().await = ModuleState::Started;
        self.emit(ModuleEventKind::Started).await;

        // 시작 시점에 이미 모든 의존성이 만족이면 바로 활성화
        self.activate_if_ready().await;
        Ok(())
    }

    /// 준비되었으면 활성화 (멱등)
    ///
    /// 상태가 `Started`이고 모든 의존성이 만족일 때만 진행합니다.
    /// 활성화: 의존성별 주입 → `on_activate` → `on_initialized` → `Active`.
    pub async fn activate_if_ready(&self) {
        let _guard = self.activation.lock().await;

        if *self.state.read().await != ModuleState::Started {
            return;
        }

        let dependencies = self.dependencies.read().await.clone();
        for dependency in &dependencies {
            if !dependency.is_satisfied().await {
                trace!(
                    module = %self.id,
                    dependency = %dependency.describe(),
                    "Not ready: dependency unsatisfied"
                );
                return;
            }
        }

        {
            let mut state = self.state.write().await;
            if *state != ModuleState::Started {
                return;
            }
            *state = ModuleState::Activating;
        }
        debug!(module = %self.id, "Activating module");

        let component = self.component.read().await.clone();
        if let Some(component) = &component {
            let ctx = self.build_context(&dependencies).await;

            for dependency in &dependencies {
                component
                    .on_inject(dependency.field(), dependency.injected_value().await)
                    .await;
            }

            if let Err(e) = component.on_activate(&ctx).await {
                error!(
                    module = %self.id,
                    component = component.name(),
                    error = %e,
                    "Component activation failed"
                );
                *self.state.write().await = ModuleState::Started;
                return;
            }

            if let Err(e) = component.on_initialized(&ctx).await {
                error!(
                    module = %self.id,
                    component = component.name(),
                    error = %e,
                    "Component initialization failed"
                );
                component.on_deactivate(&ctx).await;
                *self.state.write().await = ModuleState::Started;
                return;
            }
        }

        *self.state.write().await = ModuleState::Active;
        info!(module = %self.id, "Module has been ACTIVATED");
        self.emit(ModuleEventKind::Activated).await;
    }

    /// 비활성화 (멱등)
    ///
    /// 활성화의 역순: `on_deactivate` 훅 → 주입 값 제거(역순) → `Started`.
    pub async fn deactivate(&self) {
        let _guard = self.activation.lock().await;

        {
            let mut state = self.state.write().await;
            if *state != ModuleState::Active {
                return;
            }
            *state = ModuleState::Deactivating;
        }

        let dependencies = self.dependencies.read().await.clone();
        if let Some(component) = self.component.read().await.clone() {
            let ctx = self.build_context(&dependencies).await;
            component.on_deactivate(&ctx).await;

            for dependency in dependencies.iter().rev() {
                component.on_inject(dependency.field(), None).await;
            }
        }

        *self.state.write().await = ModuleState::Started;
        info!(module = %self.id, "Module has been DEACTIVATED");
        self.emit(ModuleEventKind::Deactivated).await;
    }

    /// 모듈 종료: 비활성화 후 모든 의존성을 역순으로 정지 (멱등)
    pub async fn stop(&self) {
        self.deactivate().await;

        {
            let mut state = self.state.write().await;
            match *state {
                ModuleState::Installed | ModuleState::Stopping => return,
                _ => *state = ModuleState::Stopping,
            }
        }

        let dependencies = self.dependencies.read().await.clone();
        for dependency in dependencies.iter().rev() {
            dependency.stop().await;
        }

        *self.state.write().await = ModuleState::Installed;
        info!(module = %self.id, "Module stopped");
        self.emit(ModuleEventKind::Stopped).await;
    }

    // ========================================================================
    // 주입 값 조회 (코드 생성 레이어의 룩업 계약)
    // ========================================================================

    /// 필드에 바인딩된 의존성의 마지막 주입 값
    ///
    /// 생성된 필드 초기화 코드가 사용하는 룩업입니다. 알 수 없는 필드나
    /// 아직 주입되지 않은 필드는 에러가 아니라 `None`입니다.
    pub async fn instance_value(&self, field: &str) -> Option<InjectedValue> {
        let dependencies = self.dependencies.read().await.clone();
        for dependency in &dependencies {
            if dependency.field() == field {
                return dependency.injected_value().await;
            }
        }
        None
    }

    async fn build_context(&self, dependencies: &[Arc<dyn Dependency>]) -> ComponentContext {
        let mut values = HashMap::new();
        for dependency in dependencies {
            if let Some(value) = dependency.injected_value().await {
                values.insert(dependency.field().to_string(), value);
            }
        }
        ComponentContext {
            module: self.id.clone(),
            registry: Arc::clone(&self.registry),
            values,
        }
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Module[{}]", self.id)
    }
}

// ============================================================================
// DependencyHost - 의존성 통지 수신
// ============================================================================

#[async_trait]
impl DependencyHost for Module {
    async fn on_dependency_satisfied(&self) {
        self.activate_if_ready().await;
    }

    async fn on_dependency_unsatisfied(&self) {
        self.deactivate().await;
    }

    async fn on_injection_changed(&self, field: &str) {
        if *self.state.read().await != ModuleState::Active {
            return;
        }
        let value = self.instance_value(field).await;
        if let Some(component) = self.component.read().await.clone() {
            component.on_inject(field, value).await;
        }
    }
}

// ============================================================================
// 테스트
// ============================================================================
