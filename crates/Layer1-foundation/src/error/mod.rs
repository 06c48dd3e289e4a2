//! Error types for Weft
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Weft 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 레지스트리 관련
    // ========================================================================
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Registry is shut down")]
    RegistryShutdown,

    // ========================================================================
    // 의존성 관련
    // ========================================================================
    #[error("Dependency error: {0}")]
    Dependency(String),

    #[error("Injection failed: {dependency} - {message}")]
    Injection { dependency: String, message: String },

    // ========================================================================
    // 모듈 관련
    // ========================================================================
    #[error("Module error: {0}")]
    Module(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Component error: {component} - {message}")]
    Component { component: String, message: String },

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// 하나의 구독자/의존성에 국한된 에러인지 확인
    ///
    /// 이 범주의 에러는 디스패치 경계에서 로깅 후 격리되며,
    /// 레지스트리 전체의 일관성에는 영향을 주지 않습니다.
    pub fn is_contained(&self) -> bool {
        matches!(
            self,
            Error::Dependency(_) | Error::Injection { .. } | Error::Component { .. }
        )
    }

    /// Injection 에러 생성 헬퍼
    pub fn injection(dependency: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Injection {
            dependency: dependency.into(),
            message: message.into(),
        }
    }

    /// Component 에러 생성 헬퍼
    pub fn component(component: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
