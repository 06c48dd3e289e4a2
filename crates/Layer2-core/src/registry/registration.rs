//! ServiceRegistration - 공표된 서비스의 레지스트리 측 핸들
//!
//! 핸들은 불변 식별 정보(id, 타입 태그, 제공자)만 직접 보유합니다.
//! 라이브 인스턴스와 프로퍼티 백은 레지스트리의 원본 맵에만 저장되므로,
//! 해제 후에는 핸들을 통해 더 이상 도달할 수 없습니다.

use crate::registry::dispatch::DispatchOp;
use crate::registry::service_registry::RegistryShared;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Weak};
use weft_foundation::{ModuleId, ServiceId, ServiceInstance, ServiceProperties, TypeTag};

/// 서비스 등록 핸들
///
/// `ServiceRegistry::register`가 반환하며, 제공자는 이 핸들로
/// 프로퍼티를 변경하거나 등록을 해제합니다. 동등성과 해시는 `id` 기준입니다.
#[derive(Clone)]
pub struct ServiceRegistration {
    inner: Arc<RegistrationInner>,
}

struct RegistrationInner {
    id: ServiceId,
    type_tag: TypeTag,
    provider: Option<ModuleId>,
    registered_at: DateTime<Utc>,
    shared: Weak<RegistryShared>,
}

impl ServiceRegistration {
    pub(crate) fn new(
        id: ServiceId,
        type_tag: TypeTag,
        provider: Option<ModuleId>,
        shared: Weak<RegistryShared>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistrationInner {
                id,
                type_tag,
                provider,
                registered_at: Utc::now(),
                shared,
            }),
        }
    }

    /// 등록 ID (불변, 프로세스 내 유일)
    pub fn id(&self) -> ServiceId {
        self.inner.id
    }

    /// 공표된 타입 태그 (불변)
    pub fn type_tag(&self) -> &TypeTag {
        &self.inner.type_tag
    }

    /// 제공자 모듈
    pub fn provider(&self) -> Option<&ModuleId> {
        self.inner.provider.as_ref()
    }

    /// 등록 시각
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.inner.registered_at
    }

    /// 현재 프로퍼티 스냅샷 (해제 후에는 빈 맵)
    pub async fn properties(&self) -> ServiceProperties {
        if let Some(shared) = self.inner.shared.upgrade() {
            let services = shared.services.read().await;
            if let Some(entry) = services.get(&self.inner.id) {
                return entry.properties.clone();
            }
        }
        ServiceProperties::new()
    }

    /// 라이브 서비스 인스턴스 (해제 후에는 None)
    pub async fn instance(&self) -> Option<ServiceInstance> {
        let shared = self.inner.shared.upgrade()?;
        let services = shared.services.read().await;
        services.get(&self.inner.id).map(|e| Arc::clone(&e.instance))
    }

    /// 아직 등록되어 있는지 확인
    pub async fn is_registered(&self) -> bool {
        if let Some(shared) = self.inner.shared.upgrade() {
            let services = shared.services.read().await;
            return services.contains_key(&self.inner.id);
        }
        false
    }

    /// 프로퍼티 하나 설정
    ///
    /// 변경은 디스패치 큐를 통해 적용되며, 매칭이 바뀐 구독자에게
    /// registered/unregistered/modified 이벤트로 전파됩니다.
    pub fn set_property(&self, key: impl Into<String>, value: Value) {
        let mut properties = ServiceProperties::new();
        properties.insert(key.into(), value);
        self.set_properties(properties);
    }

    /// 여러 프로퍼티를 한번에 병합
    pub fn set_properties(&self, properties: ServiceProperties) {
        self.enqueue(DispatchOp::SetProperties {
            id: self.inner.id,
            properties,
        });
    }

    /// 프로퍼티 제거
    pub fn remove_property(&self, key: impl Into<String>) {
        self.enqueue(DispatchOp::RemoveProperty {
            id: self.inner.id,
            key: key.into(),
        });
    }

    /// 등록 해제 (멱등)
    ///
    /// 두 번 해제해도 에러가 아니며, 두 번째 호출은 효과가 없습니다.
    pub fn unregister(&self) {
        self.enqueue(DispatchOp::Unregister { id: self.inner.id });
    }

    fn enqueue(&self, op: DispatchOp) {
        if let Some(shared) = self.inner.shared.upgrade() {
            shared.enqueue(op);
        }
    }
}

impl PartialEq for ServiceRegistration {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ServiceRegistration {}

impl std::hash::Hash for ServiceRegistration {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl std::fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("id", &self.inner.id)
            .field("type_tag", &self.inner.type_tag)
            .field("provider", &self.inner.provider)
            .finish()
    }
}

impl std::fmt::Display for ServiceRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner.provider {
            Some(provider) => write!(
                f,
                "Service[{} #{} from {}]",
                self.inner.type_tag,
                self.inner.id.value(),
                provider
            ),
            None => write!(
                f,
                "Service[{} #{}]",
                self.inner.type_tag,
                self.inner.id.value()
            ),
        }
    }
}
