//! ServiceListener - 레지스트리 이벤트 구독 인터페이스
//!
//! 호출자가 제공한 리스너는 (타입 태그, 필터, 소유 모듈) 구독 정보와 함께
//! 어댑터로 감싸집니다. 어댑터는 강한 참조 또는 약한 참조 변형으로
//! 리스너를 보유하며, 약한 변형은 리스너가 회수된 뒤 첫 디스패치에서
//! 자신의 구독을 스스로 제거합니다.

use crate::registry::dispatch::DispatchOp;
use crate::registry::service_registry::RegistryShared;
use crate::registry::ServiceRegistration;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tracing::{trace, warn};
use weft_foundation::{
    ListenerId, ModuleId, PropertyFilter, ServiceInstance, ServiceProperties, TypeTag,
};

// ============================================================================
// ServiceListener Trait
// ============================================================================

/// 서비스 이벤트 리스너
///
/// 모든 콜백은 디스패치 워커에서, 레지스트리 락 없이 실행됩니다.
/// 콜백 안에서 register/unregister를 호출해도 안전합니다 (큐에 적재될 뿐).
#[async_trait]
pub trait ServiceListener: Send + Sync {
    /// 리스너 이름 (디버깅/로깅용)
    fn name(&self) -> &str;

    /// 구독과 매칭되는 서비스가 등록됨
    async fn on_registered(&self, registration: &ServiceRegistration);

    /// 구독과 매칭되던 서비스가 해제됨
    ///
    /// `instance`는 해제 시점의 마지막 인스턴스입니다.
    async fn on_unregistered(&self, registration: &ServiceRegistration, instance: ServiceInstance);

    /// 매칭 상태는 유지된 채 프로퍼티만 변경됨
    async fn on_modified(&self, _registration: &ServiceRegistration) {}
}

// ============================================================================
// ListenerBinding - 강한/약한 참조 변형
// ============================================================================

pub(crate) enum ListenerBinding {
    Strong(Arc<dyn ServiceListener>),
    Weak(Weak<dyn ServiceListener>),
}

// ============================================================================
// ListenerAdapter - 구독 + 리스너 래퍼
// ============================================================================

pub(crate) struct ListenerAdapter {
    id: ListenerId,
    type_tag: TypeTag,
    filter: Option<PropertyFilter>,
    owner: Option<ModuleId>,
    binding: ListenerBinding,
}

impl ListenerAdapter {
    pub(crate) fn new(
        id: ListenerId,
        type_tag: TypeTag,
        filter: Option<PropertyFilter>,
        owner: Option<ModuleId>,
        binding: ListenerBinding,
    ) -> Self {
        Self {
            id,
            type_tag,
            filter,
            owner,
            binding,
        }
    }

    pub(crate) fn id(&self) -> ListenerId {
        self.id
    }

    /// 타입 태그와 프로퍼티 필터 매칭
    pub(crate) fn matches(&self, type_tag: &TypeTag, properties: &ServiceProperties) -> bool {
        self.type_tag == *type_tag
            && self
                .filter
                .as_ref()
                .map_or(true, |filter| filter.matches(properties))
    }

    /// 리스너 인스턴스 해석 (약한 참조가 죽었으면 None)
    fn resolve(&self) -> Option<Arc<dyn ServiceListener>> {
        match &self.binding {
            ListenerBinding::Strong(listener) => Some(Arc::clone(listener)),
            ListenerBinding::Weak(listener) => listener.upgrade(),
        }
    }

    /// 로깅용 구독 설명
    pub(crate) fn describe(&self) -> String {
        let mut description = format!("{}[{}", self.id, self.type_tag);
        if let Some(filter) = &self.filter {
            description.push_str(&format!(" {}", filter));
        }
        if let Some(owner) = &self.owner {
            description.push_str(&format!(" of {}", owner));
        }
        description.push(']');
        description
    }

    /// 리스너 해석에 실패한 약한 구독을 스스로 제거
    fn self_remove(&self, shared: &RegistryShared) {
        trace!(
            listener = %self.describe(),
            "Weak listener reclaimed; removing subscription"
        );
        shared.enqueue(DispatchOp::RemoveListener { id: self.id });
    }

    pub(crate) async fn deliver_registered(
        &self,
        shared: &RegistryShared,
        registration: &ServiceRegistration,
        properties: &ServiceProperties,
    ) {
        if !self.matches(registration.type_tag(), properties) {
            return;
        }
        match self.resolve() {
            Some(listener) => {
                invoke_guarded(&self.describe(), listener.on_registered(registration)).await;
            }
            None => self.self_remove(shared),
        }
    }

    pub(crate) async fn deliver_unregistered(
        &self,
        shared: &RegistryShared,
        registration: &ServiceRegistration,
        instance: ServiceInstance,
        properties: &ServiceProperties,
    ) {
        if !self.matches(registration.type_tag(), properties) {
            return;
        }
        match self.resolve() {
            Some(listener) => {
                invoke_guarded(
                    &self.describe(),
                    listener.on_unregistered(registration, instance),
                )
                .await;
            }
            None => self.self_remove(shared),
        }
    }

    pub(crate) async fn deliver_modified(
        &self,
        shared: &RegistryShared,
        registration: &ServiceRegistration,
        properties: &ServiceProperties,
    ) {
        if !self.matches(registration.type_tag(), properties) {
            return;
        }
        match self.resolve() {
            Some(listener) => {
                invoke_guarded(&self.describe(), listener.on_modified(registration)).await;
            }
            None => self.self_remove(shared),
        }
    }
}

// ============================================================================
// ListenerHandle - 구독 해제 핸들
// ============================================================================

/// 리스너 구독 핸들
///
/// `unregister`는 멱등이며, 이벤트 콜백 안에서 호출해도 안전합니다
/// (제거는 디스패치 큐를 통해 적용).
pub struct ListenerHandle {
    id: ListenerId,
    shared: Weak<RegistryShared>,
}

impl ListenerHandle {
    pub(crate) fn new(id: ListenerId, shared: Weak<RegistryShared>) -> Self {
        Self { id, shared }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// 구독 해제 (멱등)
    pub fn unregister(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.enqueue(DispatchOp::RemoveListener { id: self.id });
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

// ============================================================================
// 구독자 격리
// ============================================================================

/// 구독자 콜백을 패닉 격리 경계 안에서 실행
///
/// 패닉은 잡아서 구독자 식별 정보와 함께 로깅하고, 나머지 구독자에 대한
/// 전달과 이미 적용된 레지스트리 변경에는 영향을 주지 않습니다.
pub(crate) async fn invoke_guarded<F>(subscriber: &str, callback: F)
where
    F: Future<Output = ()>,
{
    if AssertUnwindSafe(callback).catch_unwind().await.is_err() {
        warn!(
            subscriber = subscriber,
            "Subscriber callback panicked; continuing delivery to remaining subscribers"
        );
    }
}
