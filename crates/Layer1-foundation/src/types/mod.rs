//! Core types - 서비스/모듈 식별자와 프로퍼티 모델
//!
//! 레지스트리 전반에서 쓰이는 기본 타입들을 정의합니다.
//! 서비스 인스턴스는 타입 태그만으로 식별되며, 페이로드 검증은 하지 않습니다.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// ServiceId - 서비스 등록 식별자
// ============================================================================

/// 서비스 등록 ID
///
/// 레지스트리 수명 동안 프로세스 내에서 유일하며, 등록 시점에
/// 단조 증가 카운터로 할당됩니다. 해제된 ID는 재사용되지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceId(u64);

impl ServiceId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// 원시 값 반환
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "service-{}", self.0)
    }
}

/// ServiceId 할당기 - 내부용
///
/// 레지스트리가 소유하며, 등록마다 다음 ID를 발급합니다.
#[derive(Debug, Default)]
pub struct ServiceIdAllocator {
    next: std::sync::atomic::AtomicU64,
}

impl ServiceIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 ID 발급 (단조 증가)
    pub fn allocate(&self) -> ServiceId {
        ServiceId::new(self.next.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
    }
}

// ============================================================================
// ListenerId - 리스너 구독 식별자
// ============================================================================

/// 리스너 구독 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

// ============================================================================
// ModuleId - 모듈 이름
// ============================================================================

/// 모듈 식별자 (심볼릭 이름)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ModuleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// TypeTag - 서비스 타입 태그
// ============================================================================

/// 서비스가 공표하는 capability의 타입 태그
///
/// 일반적으로 `TypeTag::of::<T>()`로 Rust 타입에서 파생하지만,
/// 임의의 문자열 태그도 허용합니다. 태그 간 할당 가능성은 동등성입니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeTag(Cow<'static, str>);

impl TypeTag {
    /// 명시적 태그 생성
    pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
        Self(tag.into())
    }

    /// Rust 타입에서 태그 파생
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(Cow::Borrowed(std::any::type_name::<T>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&'static str> for TypeTag {
    fn from(s: &'static str) -> Self {
        Self(Cow::Borrowed(s))
    }
}

// ============================================================================
// ServiceInstance - 공표된 서비스 객체
// ============================================================================

/// 제공자가 등록 시점에 연결하는 불투명 서비스 객체
///
/// 소유권은 등록 수명 동안 제공자와 레지스트리가 공유하며,
/// 해제 후에는 레지스트리가 참조를 버립니다. 해제 이전에 인스턴스를
/// 캐시한 소비자는 계속 보유할 수 있습니다 (의도된 속성).
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// 서비스 인스턴스를 구체 타입으로 다운캐스트
pub fn downcast_service<T: Send + Sync + 'static>(instance: &ServiceInstance) -> Option<Arc<T>> {
    Arc::clone(instance).downcast::<T>().ok()
}

// ============================================================================
// ServiceProperties - 프로퍼티 백
// ============================================================================

/// 문자열 키 프로퍼티 맵 (등록 후에도 변경 가능)
pub type ServiceProperties = HashMap<String, Value>;

/// 랭킹 프로퍼티 키
///
/// 같은 요구를 여러 서비스가 만족할 때 우선순위를 가르는 정수 프로퍼티.
pub const SERVICE_RANKING: &str = "service.ranking";

/// 프로퍼티 맵에서 랭킹 추출 (없거나 정수가 아니면 0)
pub fn ranking_of(properties: &ServiceProperties) -> i64 {
    properties
        .get(SERVICE_RANKING)
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_id_allocation() {
        let allocator = ServiceIdAllocator::new();
        let a = allocator.allocate();
        let b = allocator.allocate();

        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(a.to_string(), "service-0");
    }

    #[test]
    fn test_type_tag_equality() {
        struct HttpHandler;

        assert_eq!(TypeTag::of::<HttpHandler>(), TypeTag::of::<HttpHandler>());
        assert_ne!(TypeTag::of::<HttpHandler>(), TypeTag::new("http.handler"));
        assert_eq!(TypeTag::new("http.handler"), TypeTag::from("http.handler"));
    }

    #[test]
    fn test_downcast_service() {
        let instance: ServiceInstance = Arc::new("hello".to_string());

        assert_eq!(*downcast_service::<String>(&instance).unwrap(), "hello");
        assert!(downcast_service::<u64>(&instance).is_none());
    }

    #[test]
    fn test_ranking_of() {
        let mut props = ServiceProperties::new();
        assert_eq!(ranking_of(&props), 0);

        props.insert(SERVICE_RANKING.into(), json!(42));
        assert_eq!(ranking_of(&props), 42);

        // 정수가 아닌 랭킹은 무시
        props.insert(SERVICE_RANKING.into(), json!("high"));
        assert_eq!(ranking_of(&props), 0);
    }
}
