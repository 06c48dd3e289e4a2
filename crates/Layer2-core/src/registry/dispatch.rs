//! Dispatch - 단일 워커의 순서 보장 변경 적용
//!
//! 모든 레지스트리 변경은 `DispatchOp`로 큐에 적재되고, 하나의 워커 태스크가
//! 순서대로 적용합니다. 원본 맵 변경은 짧은 write-lock 구간에서 끝내고,
//! 리스너 fan-out은 락을 놓은 채 수행합니다. 리스너가 큐에 새 작업을 넣어도
//! 워커는 현재 작업을 마친 뒤 이어서 처리하므로 재진입 데드락이 없습니다.

use crate::registry::listener::ListenerAdapter;
use crate::registry::service_registry::{RegistryShared, ServiceEntry};
use crate::registry::{ServiceEvent, ServiceRegistration};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};
use weft_foundation::{ListenerId, ServiceId, ServiceInstance, ServiceProperties};

// ============================================================================
// DispatchOp - 큐에 적재되는 변경 단위
// ============================================================================

pub(crate) enum DispatchOp {
    /// 서비스 등록: 원본 맵에 적재 후 매칭 구독자에게 fan-out
    Register {
        registration: ServiceRegistration,
        instance: ServiceInstance,
        properties: ServiceProperties,
    },

    /// 서비스 해제 (멱등): 제거 시점에 매칭되던 구독자에게 마지막 인스턴스 전달
    Unregister { id: ServiceId },

    /// 리스너 추가: 현재 매칭되는 모든 등록을 리플레이한 뒤 ack
    AddListener {
        adapter: Arc<ListenerAdapter>,
        ack: oneshot::Sender<()>,
    },

    /// 리스너 제거 (멱등)
    RemoveListener { id: ListenerId },

    /// 프로퍼티 병합: 구독별로 매칭 변화를 계산해 이벤트 종류 결정
    SetProperties {
        id: ServiceId,
        properties: ServiceProperties,
    },

    /// 프로퍼티 제거
    RemoveProperty { id: ServiceId, key: String },

    /// 큐 배수 장벽 (테스트/호출자 동기화용)
    Flush { ack: oneshot::Sender<()> },

    /// 워커 종료
    Shutdown,
}

// ============================================================================
// Dispatch Worker
// ============================================================================

pub(crate) async fn run_dispatcher(
    shared: Arc<RegistryShared>,
    mut ops: mpsc::UnboundedReceiver<DispatchOp>,
) {
    while let Some(op) = ops.recv().await {
        shared.dispatched.fetch_add(1, Ordering::Relaxed);

        match op {
            DispatchOp::Register {
                registration,
                instance,
                properties,
            } => {
                apply_register(&shared, registration, instance, properties).await;
            }
            DispatchOp::Unregister { id } => {
                apply_unregister(&shared, id).await;
            }
            DispatchOp::AddListener { adapter, ack } => {
                apply_add_listener(&shared, adapter).await;
                let _ = ack.send(());
            }
            DispatchOp::RemoveListener { id } => {
                apply_remove_listener(&shared, id).await;
            }
            DispatchOp::SetProperties { id, properties } => {
                apply_property_change(&shared, id, PropertyChange::Merge(properties)).await;
            }
            DispatchOp::RemoveProperty { id, key } => {
                apply_property_change(&shared, id, PropertyChange::Remove(key)).await;
            }
            DispatchOp::Flush { ack } => {
                let _ = ack.send(());
            }
            DispatchOp::Shutdown => {
                info!("Service registry dispatcher stopped");
                break;
            }
        }
    }
}

async fn apply_register(
    shared: &Arc<RegistryShared>,
    registration: ServiceRegistration,
    instance: ServiceInstance,
    properties: ServiceProperties,
) {
    {
        let mut services = shared.services.write().await;
        services.insert(
            registration.id(),
            ServiceEntry {
                registration: registration.clone(),
                instance,
                properties: properties.clone(),
            },
        );
    }

    trace!(service = %registration, "Registered service");
    let _ = shared.event_tx.send(ServiceEvent::registered(&registration));

    for adapter in shared.listeners_snapshot().await {
        adapter
            .deliver_registered(shared, &registration, &properties)
            .await;
    }
}

async fn apply_unregister(shared: &Arc<RegistryShared>, id: ServiceId) {
    let removed = {
        let mut services = shared.services.write().await;
        services.remove(&id)
    };

    // 이미 제거된 등록에 대한 두 번째 해제는 no-op
    let Some(entry) = removed else { return };

    debug!(service = %entry.registration, "Unregistered service");
    let _ = shared
        .event_tx
        .send(ServiceEvent::unregistered(&entry.registration));

    for adapter in shared.listeners_snapshot().await {
        adapter
            .deliver_unregistered(
                shared,
                &entry.registration,
                Arc::clone(&entry.instance),
                &entry.properties,
            )
            .await;
    }
}

async fn apply_add_listener(shared: &Arc<RegistryShared>, adapter: Arc<ListenerAdapter>) {
    {
        let mut listeners = shared.listeners.write().await;
        listeners.push(Arc::clone(&adapter));
    }
    debug!(listener = %adapter.describe(), "Registered service listener");

    // 이미 존재하는 매칭 등록을 리플레이 - 리스너 추가도 디스패치 작업이므로
    // 리플레이와 라이브 이벤트 사이에 공백도 중복도 생기지 않는다
    let existing: Vec<(ServiceRegistration, ServiceProperties)> = {
        let services = shared.services.read().await;
        services
            .values()
            .map(|entry| (entry.registration.clone(), entry.properties.clone()))
            .collect()
    };
    for (registration, properties) in existing {
        adapter
            .deliver_registered(shared, &registration, &properties)
            .await;
    }
}

async fn apply_remove_listener(shared: &Arc<RegistryShared>, id: ListenerId) {
    let mut listeners = shared.listeners.write().await;
    let before = listeners.len();
    listeners.retain(|adapter| adapter.id() != id);
    if listeners.len() != before {
        trace!(listener = %id, "Unregistered service listener");
    }
}

enum PropertyChange {
    Merge(ServiceProperties),
    Remove(String),
}

async fn apply_property_change(shared: &Arc<RegistryShared>, id: ServiceId, change: PropertyChange) {
    let updated = {
        let mut services = shared.services.write().await;
        match services.get_mut(&id) {
            Some(entry) => {
                let old_properties = entry.properties.clone();
                match change {
                    PropertyChange::Merge(properties) => {
                        entry.properties.extend(properties);
                    }
                    PropertyChange::Remove(key) => {
                        entry.properties.remove(&key);
                    }
                }
                Some((
                    entry.registration.clone(),
                    Arc::clone(&entry.instance),
                    old_properties,
                    entry.properties.clone(),
                ))
            }
            None => None,
        }
    };

    let Some((registration, instance, old_properties, new_properties)) = updated else {
        return;
    };

    trace!(service = %registration, "Service properties changed");
    let _ = shared.event_tx.send(ServiceEvent::modified(&registration));

    // 구독별로 매칭 변화를 따져 이벤트 종류를 결정한다:
    //  - 새로 매칭       → registered
    //  - 더 이상 안 매칭 → unregistered (마지막 인스턴스 포함)
    //  - 계속 매칭       → modified
    for adapter in shared.listeners_snapshot().await {
        let was_matching = adapter.matches(registration.type_tag(), &old_properties);
        let now_matching = adapter.matches(registration.type_tag(), &new_properties);
        match (was_matching, now_matching) {
            (false, true) => {
                adapter
                    .deliver_registered(shared, &registration, &new_properties)
                    .await;
            }
            (true, false) => {
                adapter
                    .deliver_unregistered(
                        shared,
                        &registration,
                        Arc::clone(&instance),
                        &old_properties,
                    )
                    .await;
            }
            (true, true) => {
                adapter
                    .deliver_modified(shared, &registration, &new_properties)
                    .await;
            }
            (false, false) => {}
        }
    }
}
