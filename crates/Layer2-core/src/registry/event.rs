//! ServiceEvent - 레지스트리 변경 관찰용 브로드캐스트 이벤트
//!
//! 리스너 인터페이스와 별개로, 외부 관찰자가 `ServiceRegistry::subscribe`로
//! 받아보는 직렬화 가능한 요약 이벤트입니다. 인스턴스 자체는 싣지 않습니다.

use crate::registry::ServiceRegistration;
use serde::{Deserialize, Serialize};

/// 레지스트리 변경 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServiceEvent {
    /// 서비스 등록됨
    Registered {
        id: u64,
        type_tag: String,
        provider: Option<String>,
    },

    /// 서비스 해제됨
    Unregistered {
        id: u64,
        type_tag: String,
        provider: Option<String>,
    },

    /// 서비스 프로퍼티 변경됨
    Modified {
        id: u64,
        type_tag: String,
        provider: Option<String>,
    },
}

impl ServiceEvent {
    pub(crate) fn registered(registration: &ServiceRegistration) -> Self {
        Self::Registered {
            id: registration.id().value(),
            type_tag: registration.type_tag().to_string(),
            provider: registration.provider().map(|p| p.to_string()),
        }
    }

    pub(crate) fn unregistered(registration: &ServiceRegistration) -> Self {
        Self::Unregistered {
            id: registration.id().value(),
            type_tag: registration.type_tag().to_string(),
            provider: registration.provider().map(|p| p.to_string()),
        }
    }

    pub(crate) fn modified(registration: &ServiceRegistration) -> Self {
        Self::Modified {
            id: registration.id().value(),
            type_tag: registration.type_tag().to_string(),
            provider: registration.provider().map(|p| p.to_string()),
        }
    }

    /// 이벤트가 가리키는 서비스 ID
    pub fn service_id(&self) -> u64 {
        match self {
            Self::Registered { id, .. } => *id,
            Self::Unregistered { id, .. } => *id,
            Self::Modified { id, .. } => *id,
        }
    }

    /// 이벤트가 가리키는 타입 태그
    pub fn type_tag(&self) -> &str {
        match self {
            Self::Registered { type_tag, .. } => type_tag,
            Self::Unregistered { type_tag, .. } => type_tag,
            Self::Modified { type_tag, .. } => type_tag,
        }
    }
}
