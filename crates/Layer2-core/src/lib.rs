//! weft-core: Core Runtime for Weft
//!
//! Layer2 - 서비스 레지스트리와 모듈 라이프사이클 레이어
//!
//! # 주요 모듈
//!
//! - `registry`: 서비스 레지스트리 (단일 디스패처, 리스너, 이벤트)
//! - `tracker`: 매칭 서비스의 라이브 랭킹 뷰
//! - `dependency`: 요구사항 변형 (required/optional/exactly-one/list/factory)
//! - `module`: 모듈 라이프사이클 게이트와 모듈 매니저
//!
//! # 사용 예시
//!
//! ```ignore
//! use weft_core::{Module, ModuleManager, ServiceRegistry};
//! use weft_core::dependency::ServiceRefDependency;
//! use weft_foundation::{PropertyFilter, TypeTag};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(ServiceRegistry::new());
//! let manager = ModuleManager::new(Arc::clone(&registry));
//!
//! // 모듈 구성: env=prod 핸들러가 있어야 활성화
//! let web = Module::new("web", Arc::clone(&registry));
//! web.add_dependency(ServiceRefDependency::required(
//!     Arc::clone(&registry),
//!     TypeTag::new("http.handler"),
//!     Some(PropertyFilter::eq("env", "prod")),
//!     "handler",
//! )).await?;
//! manager.install(web).await?;
//! manager.start_all().await?;
//!
//! // 제공자가 서비스를 공표하는 순간 모듈이 활성화된다
//! registry.register(
//!     Some("provider".into()),
//!     TypeTag::new("http.handler"),
//!     Arc::new(MyHandler::new()),
//!     Default::default(),
//! );
//! ```

// Core modules
pub mod dependency;
pub mod module;
pub mod registry;
pub mod tracker;

// Re-exports: Registry
pub use registry::{
    ListenerHandle, RegistryConfig, RegistryStats, ServiceEvent, ServiceListener,
    ServiceRegistration, ServiceRegistry,
};

// Re-exports: Tracker
pub use tracker::{ServiceTracker, TrackedService};

// Re-exports: Dependency
pub use dependency::{
    Dependency, DependencyHost, DependencyState, ExactlyOneDependency, FactoryDependency,
    InjectedValue, ServiceFactory, ServiceListDependency, ServiceListView, ServiceRefDependency,
};

// Re-exports: Module
pub use module::{
    ComponentContext, Module, ModuleComponent, ModuleEvent, ModuleEventKind, ModuleManager,
    ModuleManagerConfig, ModuleState,
};
