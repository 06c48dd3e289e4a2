//! ServiceRegistry - 서비스 원본 맵과 디스패처의 소유자

use crate::registry::dispatch::{run_dispatcher, DispatchOp};
use crate::registry::listener::{ListenerAdapter, ListenerBinding};
use crate::registry::{ListenerHandle, ServiceEvent, ServiceListener, ServiceRegistration};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;
use weft_foundation::{
    Error, ListenerId, ModuleId, PropertyFilter, Result, ServiceId, ServiceIdAllocator,
    ServiceInstance, ServiceProperties, TypeTag,
};

// ============================================================================
// RegistryConfig
// ============================================================================

/// 레지스트리 설정
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// 브로드캐스트 이벤트 채널 용량
    pub event_channel_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: 1024,
        }
    }
}

// ============================================================================
// 내부 공유 상태
// ============================================================================

/// 원본 맵의 엔트리 - 등록 핸들 + 라이브 인스턴스 + 프로퍼티 백
///
/// 인스턴스와 프로퍼티는 여기에만 저장된다. 등록 핸들은 식별 정보만
/// 보유하므로, 해제가 곧 인스턴스 도달 불가를 의미한다.
pub(crate) struct ServiceEntry {
    pub(crate) registration: ServiceRegistration,
    pub(crate) instance: ServiceInstance,
    pub(crate) properties: ServiceProperties,
}

pub(crate) struct RegistryShared {
    /// 원본 맵 (쓰기는 디스패치 워커 전용)
    pub(crate) services: RwLock<BTreeMap<ServiceId, ServiceEntry>>,

    /// 리스너 어댑터 목록 (쓰기는 디스패치 워커 전용)
    pub(crate) listeners: RwLock<Vec<Arc<ListenerAdapter>>>,

    /// 서비스 ID 할당기
    pub(crate) ids: ServiceIdAllocator,

    /// 리스너 ID 카운터
    pub(crate) listener_ids: AtomicU64,

    /// 외부 관찰용 브로드캐스트 채널
    pub(crate) event_tx: broadcast::Sender<ServiceEvent>,

    /// 디스패치 큐 송신자
    pub(crate) ops: mpsc::UnboundedSender<DispatchOp>,

    /// 처리된 디스패치 작업 수
    pub(crate) dispatched: AtomicU64,
}

impl RegistryShared {
    /// 디스패치 작업 적재. 워커가 종료된 뒤에는 false.
    pub(crate) fn enqueue(&self, op: DispatchOp) -> bool {
        self.ops.send(op).is_ok()
    }

    /// fan-out용 리스너 스냅샷 (락을 놓은 채 콜백을 실행하기 위함)
    pub(crate) async fn listeners_snapshot(&self) -> Vec<Arc<ListenerAdapter>> {
        self.listeners.read().await.clone()
    }
}

// ============================================================================
// RegistryStats
// ============================================================================

/// 레지스트리 통계
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub services: usize,
    pub listeners: usize,
    pub dispatched_ops: u64,
}

// ============================================================================
// ServiceRegistry
// ============================================================================

/// 서비스 레지스트리
///
/// 명시적으로 생성해 모든 모듈에 `Arc`로 전달합니다. 전역 싱글턴은 없습니다.
///
/// ## 사용 예시
///
/// ```ignore
/// use weft_core::registry::ServiceRegistry;
/// use weft_foundation::TypeTag;
/// use std::sync::Arc;
///
/// let registry = Arc::new(ServiceRegistry::new());
///
/// // 서비스 공표
/// let registration = registry.register(
///     Some("web".into()),
///     TypeTag::new("http.handler"),
///     Arc::new(MyHandler::new()),
///     Default::default(),
/// );
///
/// // 조회
/// let found = registry.find(&TypeTag::new("http.handler"), None).await;
///
/// // 해제 (멱등)
/// registration.unregister();
/// registry.settle().await;
/// ```
pub struct ServiceRegistry {
    shared: Arc<RegistryShared>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ServiceRegistry {
    /// 기본 설정으로 생성
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// 커스텀 설정으로 생성
    pub fn with_config(config: RegistryConfig) -> Self {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);

        let shared = Arc::new(RegistryShared {
            services: RwLock::new(BTreeMap::new()),
            listeners: RwLock::new(Vec::new()),
            ids: ServiceIdAllocator::new(),
            listener_ids: AtomicU64::new(0),
            event_tx,
            ops: ops_tx,
            dispatched: AtomicU64::new(0),
        });

        let worker = tokio::spawn(run_dispatcher(Arc::clone(&shared), ops_rx));

        Self {
            shared,
            worker: std::sync::Mutex::new(Some(worker)),
        }
    }

    // ========================================================================
    // 등록 / 해제
    // ========================================================================

    /// 서비스 등록
    ///
    /// 다음 ID를 할당하고 즉시 사용 가능한 등록 핸들을 반환합니다.
    /// 원본 맵 반영과 구독자 fan-out은 디스패치 워커가 제출 순서대로
    /// 수행합니다 (`settle`이 완료 장벽).
    pub fn register(
        &self,
        provider: Option<ModuleId>,
        type_tag: TypeTag,
        instance: ServiceInstance,
        properties: ServiceProperties,
    ) -> ServiceRegistration {
        let id = self.shared.ids.allocate();
        let registration =
            ServiceRegistration::new(id, type_tag, provider, Arc::downgrade(&self.shared));

        if !self.shared.enqueue(DispatchOp::Register {
            registration: registration.clone(),
            instance,
            properties,
        }) {
            warn!(service = %registration, "Registry is shut down; registration dropped");
        }

        registration
    }

    /// 서비스 해제 (멱등) - `registration.unregister()`와 동일
    pub fn unregister(&self, registration: &ServiceRegistration) {
        registration.unregister();
    }

    // ========================================================================
    // 조회
    // ========================================================================

    /// 첫 번째 매칭 등록 조회 (등록 순서 기준, 없으면 None)
    pub async fn find(
        &self,
        type_tag: &TypeTag,
        filter: Option<&PropertyFilter>,
    ) -> Option<ServiceRegistration> {
        let services = self.shared.services.read().await;
        services
            .values()
            .find(|entry| {
                entry.registration.type_tag() == type_tag
                    && filter.map_or(true, |f| f.matches(&entry.properties))
            })
            .map(|entry| entry.registration.clone())
    }

    /// 모든 매칭 등록 조회 (등록 순서)
    pub async fn find_all(
        &self,
        type_tag: &TypeTag,
        filter: Option<&PropertyFilter>,
    ) -> Vec<ServiceRegistration> {
        let services = self.shared.services.read().await;
        services
            .values()
            .filter(|entry| {
                entry.registration.type_tag() == type_tag
                    && filter.map_or(true, |f| f.matches(&entry.properties))
            })
            .map(|entry| entry.registration.clone())
            .collect()
    }

    // ========================================================================
    // 리스너
    // ========================================================================

    /// 리스너 등록 (강한 참조)
    ///
    /// 반환 시점에 기존 매칭 등록의 리플레이가 끝나 있습니다.
    /// 디스패치 콜백 안에서는 호출하지 마십시오 (큐 완료를 기다리므로).
    pub async fn add_listener(
        &self,
        owner: Option<ModuleId>,
        listener: Arc<dyn ServiceListener>,
        type_tag: TypeTag,
        filter: Option<PropertyFilter>,
    ) -> Result<ListenerHandle> {
        self.add_listener_entry(type_tag, filter, owner, ListenerBinding::Strong(listener))
            .await
    }

    /// 리스너 등록 (약한 참조)
    ///
    /// 리스너가 drop된 뒤 첫 디스패치에서 구독이 스스로 제거됩니다.
    pub async fn add_weak_listener(
        &self,
        owner: Option<ModuleId>,
        listener: Weak<dyn ServiceListener>,
        type_tag: TypeTag,
        filter: Option<PropertyFilter>,
    ) -> Result<ListenerHandle> {
        self.add_listener_entry(type_tag, filter, owner, ListenerBinding::Weak(listener))
            .await
    }

    async fn add_listener_entry(
        &self,
        type_tag: TypeTag,
        filter: Option<PropertyFilter>,
        owner: Option<ModuleId>,
        binding: ListenerBinding,
    ) -> Result<ListenerHandle> {
        let id = ListenerId::new(self.shared.listener_ids.fetch_add(1, Ordering::SeqCst));
        let adapter = Arc::new(ListenerAdapter::new(id, type_tag, filter, owner, binding));

        let (ack_tx, ack_rx) = oneshot::channel();
        if !self.shared.enqueue(DispatchOp::AddListener {
            adapter,
            ack: ack_tx,
        }) {
            return Err(Error::RegistryShutdown);
        }

        // 리플레이 완료 대기
        let _ = ack_rx.await;

        Ok(ListenerHandle::new(id, Arc::downgrade(&self.shared)))
    }

    // ========================================================================
    // 동기화 / 관찰
    // ========================================================================

    /// 지금까지 적재된 모든 디스패치 작업이 처리될 때까지 대기
    ///
    /// 디스패치 콜백 안에서는 호출하지 마십시오 (자기 자신을 기다리게 됨).
    pub async fn settle(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.shared.enqueue(DispatchOp::Flush { ack: ack_tx }) {
            let _ = ack_rx.await;
        }
    }

    /// 브로드캐스트 이벤트 구독
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.shared.event_tx.subscribe()
    }

    /// 등록된 서비스 수
    pub async fn service_count(&self) -> usize {
        self.shared.services.read().await.len()
    }

    /// 등록된 리스너 수
    pub async fn listener_count(&self) -> usize {
        self.shared.listeners.read().await.len()
    }

    /// 레지스트리 통계
    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            services: self.service_count().await,
            listeners: self.listener_count().await,
            dispatched_ops: self.shared.dispatched.load(Ordering::Relaxed),
        }
    }

    /// 디스패처 종료 (멱등)
    ///
    /// 이미 적재된 작업은 모두 처리한 뒤 멈춥니다. 종료 후의 등록/해제는
    /// 버려지며 경고 로그만 남습니다.
    pub async fn shutdown(&self) {
        self.shared.enqueue(DispatchOp::Shutdown);
        let worker = {
            let mut guard = match self.worker.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ServiceRegistry {
    fn drop(&mut self) {
        // shutdown 없이 버려진 레지스트리의 워커 정리
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(worker) = guard.take() {
                worker.abort();
            }
        }
    }
}

// ============================================================================
// 테스트
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex;

    fn tag() -> TypeTag {
        TypeTag::new("test.service")
    }

    fn props(pairs: &[(&str, serde_json::Value)]) -> ServiceProperties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// 수신한 이벤트를 순서대로 기록하는 리스너
    struct RecordingListener {
        name: String,
        events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                events: Mutex::new(Vec::new()),
            })
        }

        async fn events(&self) -> Vec<String> {
            self.events.lock().await.clone()
        }
    }

    #[async_trait]
    impl ServiceListener for RecordingListener {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_registered(&self, registration: &ServiceRegistration) {
            self.events
                .lock()
                .await
                .push(format!("registered:{}", registration.id().value()));
        }

        async fn on_unregistered(
            &self,
            registration: &ServiceRegistration,
            _instance: ServiceInstance,
        ) {
            self.events
                .lock()
                .await
                .push(format!("unregistered:{}", registration.id().value()));
        }

        async fn on_modified(&self, registration: &ServiceRegistration) {
            self.events
                .lock()
                .await
                .push(format!("modified:{}", registration.id().value()));
        }
    }

    /// 모든 콜백에서 패닉하는 리스너
    struct PanickingListener {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ServiceListener for PanickingListener {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn on_registered(&self, _registration: &ServiceRegistration) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("listener always fails");
        }

        async fn on_unregistered(
            &self,
            _registration: &ServiceRegistration,
            _instance: ServiceInstance,
        ) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("listener always fails");
        }
    }

    #[tokio::test]
    async fn test_register_and_find() {
        let registry = ServiceRegistry::new();

        let registration = registry.register(
            Some("web".into()),
            tag(),
            Arc::new("instance-a".to_string()),
            props(&[("env", json!("prod"))]),
        );
        registry.settle().await;

        assert!(registration.is_registered().await);
        assert_eq!(registry.service_count().await, 1);

        let found = registry.find(&tag(), None).await.unwrap();
        assert_eq!(found, registration);

        // 필터 매칭
        let filter = PropertyFilter::eq("env", "prod");
        assert!(registry.find(&tag(), Some(&filter)).await.is_some());

        let filter = PropertyFilter::eq("env", "dev");
        assert!(registry.find(&tag(), Some(&filter)).await.is_none());

        // 다른 타입 태그는 보이지 않음
        assert!(registry.find(&TypeTag::new("other"), None).await.is_none());
    }

    #[tokio::test]
    async fn test_service_id_uniqueness() {
        let registry = ServiceRegistry::new();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let registration = registry.register(
                None,
                tag(),
                Arc::new(0u32),
                ServiceProperties::new(),
            );
            assert!(seen.insert(registration.id()), "duplicate service id");
            registration.unregister();
        }
        registry.settle().await;
        assert_eq!(registry.service_count().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = ServiceRegistry::new();

        let registration =
            registry.register(None, tag(), Arc::new(1u32), ServiceProperties::new());
        registry.settle().await;
        assert_eq!(registry.service_count().await, 1);

        registration.unregister();
        registration.unregister();
        registry.settle().await;

        assert_eq!(registry.service_count().await, 0);
        assert!(!registration.is_registered().await);
        assert!(registration.instance().await.is_none());
    }

    #[tokio::test]
    async fn test_unregistered_instance_unreachable_via_handle() {
        let registry = ServiceRegistry::new();

        let registration =
            registry.register(None, tag(), Arc::new("payload".to_string()), props(&[]));
        registry.settle().await;

        // 해제 전에 캐시한 인스턴스는 계속 유효 (의도된 속성)
        let cached = registration.instance().await.unwrap();

        registration.unregister();
        registry.settle().await;

        assert!(registration.instance().await.is_none());
        assert!(registration.properties().await.is_empty());
        assert_eq!(
            *weft_foundation::downcast_service::<String>(&cached).unwrap(),
            "payload"
        );
    }

    #[tokio::test]
    async fn test_listener_replay_and_live_events() {
        let registry = ServiceRegistry::new();

        let early = registry.register(None, tag(), Arc::new(1u32), props(&[]));
        registry.settle().await;

        // 리스너 추가 시점에 이미 존재하는 등록은 리플레이로 전달
        let listener = RecordingListener::new("replay");
        let handle = registry
            .add_listener(None, listener.clone(), tag(), None)
            .await
            .unwrap();
        assert_eq!(
            listener.events().await,
            vec![format!("registered:{}", early.id().value())]
        );

        // 라이브 이벤트
        let late = registry.register(None, tag(), Arc::new(2u32), props(&[]));
        early.unregister();
        registry.settle().await;

        assert_eq!(
            listener.events().await,
            vec![
                format!("registered:{}", early.id().value()),
                format!("registered:{}", late.id().value()),
                format!("unregistered:{}", early.id().value()),
            ]
        );

        // 구독 해제 후에는 더 이상 전달되지 않음
        handle.unregister();
        registry.settle().await;
        registry.register(None, tag(), Arc::new(3u32), props(&[]));
        registry.settle().await;

        assert_eq!(listener.events().await.len(), 3);
        assert_eq!(registry.listener_count().await, 0);
    }

    #[tokio::test]
    async fn test_subscriber_isolation() {
        let registry = ServiceRegistry::new();

        // 패닉하는 리스너를 먼저 등록해 잘 동작하는 리스너보다 앞서 호출되게 함
        let panicking = Arc::new(PanickingListener {
            calls: AtomicUsize::new(0),
        });
        registry
            .add_listener(None, panicking.clone(), tag(), None)
            .await
            .unwrap();

        let recording = RecordingListener::new("well-behaved");
        registry
            .add_listener(None, recording.clone(), tag(), None)
            .await
            .unwrap();

        let a = registry.register(None, tag(), Arc::new(1u32), props(&[]));
        let b = registry.register(None, tag(), Arc::new(2u32), props(&[]));
        a.unregister();
        registry.settle().await;

        // 패닉 리스너는 모든 이벤트에서 호출되었지만
        assert_eq!(panicking.calls.load(Ordering::SeqCst), 3);

        // 잘 동작하는 리스너는 모든 이벤트를 순서대로 수신
        assert_eq!(
            recording.events().await,
            vec![
                format!("registered:{}", a.id().value()),
                format!("registered:{}", b.id().value()),
                format!("unregistered:{}", a.id().value()),
            ]
        );

        // 레지스트리 일관성도 유지
        assert_eq!(registry.service_count().await, 1);
    }

    #[tokio::test]
    async fn test_weak_listener_self_removes() {
        let registry = ServiceRegistry::new();

        let listener = RecordingListener::new("weak");
        let weak: Weak<dyn ServiceListener> = {
            let strong: Arc<dyn ServiceListener> = listener.clone();
            Arc::downgrade(&strong)
        };
        registry
            .add_weak_listener(None, weak, tag(), None)
            .await
            .unwrap();
        assert_eq!(registry.listener_count().await, 1);

        registry.register(None, tag(), Arc::new(1u32), props(&[]));
        registry.settle().await;
        assert_eq!(listener.events().await.len(), 1);

        // 리스너 drop 후 첫 디스패치에서 구독이 스스로 제거됨
        drop(listener);
        registry.register(None, tag(), Arc::new(2u32), props(&[]));
        registry.settle().await;
        registry.settle().await;

        assert_eq!(registry.listener_count().await, 0);
    }

    #[tokio::test]
    async fn test_property_change_refilters_subscriptions() {
        let registry = ServiceRegistry::new();

        let listener = RecordingListener::new("filtered");
        registry
            .add_listener(
                None,
                listener.clone(),
                tag(),
                Some(PropertyFilter::eq("env", "prod")),
            )
            .await
            .unwrap();

        // 필터에 맞지 않는 등록은 보이지 않음
        let registration =
            registry.register(None, tag(), Arc::new(1u32), props(&[("env", json!("dev"))]));
        registry.settle().await;
        assert!(listener.events().await.is_empty());

        // 프로퍼티 변경으로 매칭되기 시작 → registered
        registration.set_property("env", json!("prod"));
        registry.settle().await;
        assert_eq!(
            listener.events().await,
            vec![format!("registered:{}", registration.id().value())]
        );

        // 매칭 유지 중 다른 프로퍼티 변경 → modified
        registration.set_property("zone", json!("a"));
        registry.settle().await;
        assert_eq!(
            listener.events().await.last().unwrap(),
            &format!("modified:{}", registration.id().value())
        );

        // 매칭이 깨짐 → unregistered
        registration.set_property("env", json!("dev"));
        registry.settle().await;
        assert_eq!(
            listener.events().await.last().unwrap(),
            &format!("unregistered:{}", registration.id().value())
        );

        // 프로퍼티 제거도 같은 경로
        registration.set_property("env", json!("prod"));
        registration.remove_property("env");
        registry.settle().await;
        let events = listener.events().await;
        assert_eq!(
            events[events.len() - 2..],
            [
                format!("registered:{}", registration.id().value()),
                format!("unregistered:{}", registration.id().value()),
            ]
        );
    }

    #[tokio::test]
    async fn test_broadcast_events() {
        let registry = ServiceRegistry::new();
        let mut events = registry.subscribe();

        let registration = registry.register(None, tag(), Arc::new(1u32), props(&[]));
        registration.unregister();
        registry.settle().await;

        let first = events.recv().await.unwrap();
        assert!(matches!(first, ServiceEvent::Registered { .. }));
        assert_eq!(first.service_id(), registration.id().value());

        let second = events.recv().await.unwrap();
        assert!(matches!(second, ServiceEvent::Unregistered { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let registry = ServiceRegistry::new();

        registry.register(None, tag(), Arc::new(1u32), props(&[]));
        registry.shutdown().await;
        registry.shutdown().await;

        // 종료 후 등록은 버려짐
        registry.register(None, tag(), Arc::new(2u32), props(&[]));
        assert_eq!(registry.service_count().await, 1);

        // 종료 후 리스너 등록은 에러
        let listener = RecordingListener::new("late");
        assert!(registry
            .add_listener(None, listener, tag(), None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_find_all_insertion_order() {
        let registry = ServiceRegistry::new();

        let a = registry.register(None, tag(), Arc::new(1u32), props(&[("env", json!("prod"))]));
        let b = registry.register(None, tag(), Arc::new(2u32), props(&[("env", json!("dev"))]));
        let c = registry.register(None, tag(), Arc::new(3u32), props(&[("env", json!("prod"))]));
        registry.settle().await;

        let all = registry.find_all(&tag(), None).await;
        assert_eq!(all, vec![a.clone(), b, c.clone()]);

        let filter = PropertyFilter::eq("env", "prod");
        let prod = registry.find_all(&tag(), Some(&filter)).await;
        assert_eq!(prod, vec![a, c]);
    }
}
