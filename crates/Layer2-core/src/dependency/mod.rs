//! # Dependency System
//!
//! 모듈 요구사항을 서비스 트래커 상태로부터 계산되는 만족 신호로 변환
//!
//! ## 개요
//!
//! Dependency는 하나의 모듈 요구사항을 하나(또는 둘)의 ServiceTracker에
//! 바인딩하고, 트래커 상태에 대한 순수 함수로 만족 여부를 계산합니다.
//! 만족이 뒤집힐 때마다 소유 모듈(`DependencyHost`)에 통지해 모듈의
//! 활성화/비활성화를 유도합니다.
//!
//! ## 변형 (닫힌 집합)
//!
//! | 변형 | 만족 조건 | 주입 값 |
//! |------|-----------|---------|
//! | `ServiceRefDependency` (required) | 트래커 비어있지 않음 | best match |
//! | `ServiceRefDependency` (optional) | 항상 | best match 또는 없음 |
//! | `ExactlyOneDependency` | 정확히 1개 매칭 | 유일한 매칭 |
//! | `ServiceListDependency` | 추적 시작 후 항상 | 라이브 목록 뷰 |
//! | `FactoryDependency` | 팩토리+리소스 모두 존재, 파생 값 생성 성공 | 파생 값 |
//!
//! ## 상태 기계
//!
//! ```text
//! Stopped --start()--> Started(Unsatisfied) <--> Started(Satisfied)
//!    ▲                        │                        │
//!    └────────── stop() ──────┴────────────────────────┘
//! ```

mod compound;
mod exactly_one;
mod list;
mod single;

pub use compound::{FactoryDependency, ServiceFactory};
pub use exactly_one::ExactlyOneDependency;
pub use list::{ServiceListDependency, ServiceListView};
pub use single::ServiceRefDependency;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use weft_foundation::{Result, ServiceInstance};

// ============================================================================
// DependencyState
// ============================================================================

/// 의존성 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyState {
    /// 추적 중이 아님
    Stopped,

    /// 추적 중이지만 요구 미충족
    Unsatisfied,

    /// 요구 충족
    Satisfied,
}

impl std::fmt::Display for DependencyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Unsatisfied => write!(f, "unsatisfied"),
            Self::Satisfied => write!(f, "satisfied"),
        }
    }
}

// ============================================================================
// InjectedValue
// ============================================================================

/// 의존성이 컴포넌트에 주입하는 값
#[derive(Clone)]
pub enum InjectedValue {
    /// 단일 서비스 인스턴스 (또는 파생 값)
    Instance(ServiceInstance),

    /// 항상 최신 상태를 반영하는 읽기 전용 목록 뷰
    List(ServiceListView),
}

impl InjectedValue {
    pub fn as_instance(&self) -> Option<&ServiceInstance> {
        match self {
            Self::Instance(instance) => Some(instance),
            Self::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&ServiceListView> {
        match self {
            Self::List(view) => Some(view),
            Self::Instance(_) => None,
        }
    }

    /// 단일 값 주입을 구체 타입으로 다운캐스트
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.as_instance().and_then(weft_foundation::downcast_service)
    }
}

impl std::fmt::Debug for InjectedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instance(_) => write!(f, "InjectedValue::Instance"),
            Self::List(view) => write!(f, "InjectedValue::List(len={})", view.len()),
        }
    }
}

// ============================================================================
// DependencyHost - 소유 모듈 측 인터페이스
// ============================================================================

/// 의존성 상태 변화를 수신하는 소유자 (일반적으로 Module)
#[async_trait]
pub trait DependencyHost: Send + Sync {
    /// 의존성이 Unsatisfied → Satisfied로 전이함
    async fn on_dependency_satisfied(&self);

    /// 의존성이 Satisfied → Unsatisfied로 전이함
    async fn on_dependency_unsatisfied(&self);

    /// 만족 상태는 유지된 채 주입 값만 바뀜 (best match 교체, 프로퍼티 변경)
    async fn on_injection_changed(&self, field: &str);
}

// ============================================================================
// Dependency Trait
// ============================================================================

/// 모듈 요구사항
///
/// 모든 변형이 공유하는 단일 인터페이스입니다. 변형별 만족 정책은
/// 트래커 상태에 대한 순수 함수로 각 구현 안에 있습니다.
#[async_trait]
pub trait Dependency: Send + Sync {
    /// 주입 대상 필드 이름
    fn field(&self) -> &str;

    /// 로깅용 설명
    fn describe(&self) -> String;

    /// 소유자 연결 (start 전에 호출)
    async fn attach(&self, host: Weak<dyn DependencyHost>);

    /// 추적 시작: `Stopped → Started(Unsatisfied)` 후 현재 상태 평가
    async fn start(&self) -> Result<()>;

    /// 추적 종료 (멱등): 트래커와 주입 값을 버리고 `Stopped`로 복귀
    ///
    /// 자신의 트래커 콜백 안에서 호출해도 안전합니다.
    async fn stop(&self);

    /// 현재 상태
    async fn state(&self) -> DependencyState;

    /// 마지막으로 주입된 값
    async fn injected_value(&self) -> Option<InjectedValue>;

    /// 만족 여부
    async fn is_satisfied(&self) -> bool {
        self.state().await == DependencyState::Satisfied
    }
}

// ============================================================================
// 내부 공용 유틸
// ============================================================================

/// 소유자 참조 셀 - attach 이후 약한 참조로 보관
pub(crate) struct HostCell {
    inner: RwLock<Option<Weak<dyn DependencyHost>>>,
}

impl HostCell {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub(crate) async fn set(&self, host: Weak<dyn DependencyHost>) {
        *self.inner.write().await = Some(host);
    }

    pub(crate) async fn resolve(&self) -> Option<Arc<dyn DependencyHost>> {
        self.inner.read().await.as_ref().and_then(Weak::upgrade)
    }
}

/// 인스턴스 동일성 비교 (Arc 포인터 기준)
pub(crate) fn same_instance(a: Option<&ServiceInstance>, b: Option<&ServiceInstance>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
