use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chanbus::{
    BusBuilder, ChannelBus, LoopState, LoopStatusSnapshot, MemoryBroker, MemoryPool, Message,
    RestartBackoff, StatusCode,
};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PriceUpdate {
    symbol: String,
    price: i64,
}

impl Message for PriceUpdate {
    const TAG: &'static str = "PriceUpdate";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderFilled {
    order_id: u64,
    quantity: u32,
    note: Option<String>,
}

impl Message for OrderFilled {
    const TAG: &'static str = "OrderFilled";
}

fn price(price: i64) -> PriceUpdate {
    PriceUpdate {
        symbol: "X".into(),
        price,
    }
}

fn ticks_bus(broker: &Arc<MemoryBroker>) -> ChannelBus<MemoryPool> {
    BusBuilder::new("ticks")
        .variant::<PriceUpdate>()
        .variant::<OrderFilled>()
        .build(Arc::new(broker.pool()))
        .unwrap()
}

async fn wait_status<F>(
    bus: &ChannelBus<MemoryPool>,
    predicate: F,
) -> LoopStatusSnapshot
where
    F: FnMut(&LoopStatusSnapshot) -> bool,
{
    let status = bus.status_handle();
    timeout(WAIT, status.wait_until(predicate))
        .await
        .expect("loop status did not reach the expected state")
}

/// Тест проверяет основной сценарий: PriceUpdate в канале "ticks" получает
/// ровно один слушатель PriceUpdate, слушатель OrderFilled не получает
/// ничего.
#[tokio::test]
async fn test_price_update_reaches_only_its_listeners() {
    let broker = Arc::new(MemoryBroker::default());
    let bus = ticks_bus(&broker);

    let prices = Arc::new(Mutex::new(Vec::new()));
    let orders = Arc::new(AtomicUsize::new(0));

    let sink = prices.clone();
    bus.on::<PriceUpdate, _>(move |m| sink.lock().unwrap().push(m.clone()))
        .unwrap();
    let counter = orders.clone();
    bus.on::<OrderFilled, _>(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    assert!(timeout(WAIT, bus.wait_for_active()).await.unwrap());
    let receivers = bus.publish(&price(10)).await.unwrap();
    assert_eq!(receivers, 1);

    wait_status(&bus, |s| s.messages_routed == 1).await;
    assert_eq!(*prices.lock().unwrap(), vec![price(10)]);
    assert_eq!(orders.load(Ordering::SeqCst), 0);

    bus.shutdown_and_wait().await;
}

#[tokio::test]
async fn test_messages_arrive_in_publish_order() {
    let broker = Arc::new(MemoryBroker::default());
    let bus = ticks_bus(&broker);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.on::<PriceUpdate, _>(move |m| sink.lock().unwrap().push(m.price))
        .unwrap();

    assert!(timeout(WAIT, bus.wait_for_active()).await.unwrap());
    for n in 0..50 {
        bus.publish(&price(n)).await.unwrap();
    }

    wait_status(&bus, |s| s.messages_routed == 50).await;
    assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
    bus.shutdown_and_wait().await;
}

/// Тест проверяет, что сообщения с `None` и разными вариантами проходят
/// через общий канал без потерь.
#[tokio::test]
async fn test_mixed_variants_share_channel() {
    let broker = Arc::new(MemoryBroker::default());
    let bus = Arc::new(ticks_bus(&broker));
    let orders = Arc::new(Mutex::new(Vec::new()));
    let sink = orders.clone();
    bus.on::<OrderFilled, _>(move |m| sink.lock().unwrap().push(m.clone()))
        .unwrap();

    assert!(timeout(WAIT, bus.wait_for_active()).await.unwrap());

    let mut tasks = Vec::new();
    for id in 0..8u64 {
        let bus = bus.clone();
        tasks.push(tokio::spawn(async move {
            bus.publish(&price(id as i64)).await.unwrap();
            bus.publish(&OrderFilled {
                order_id: id,
                quantity: 1,
                note: None,
            })
            .await
            .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    wait_status(&bus, |s| s.messages_routed == 16).await;
    let mut ids: Vec<u64> = orders.lock().unwrap().iter().map(|o| o.order_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..8).collect::<Vec<_>>());
    assert!(orders.lock().unwrap().iter().all(|o| o.note.is_none()));

    bus.shutdown_and_wait().await;
}

/// Тест проверяет, что после обрыва сессии цикл сам подписывается заново
/// и доставка продолжается.
#[tokio::test]
async fn test_restart_after_severed_session() {
    let broker = Arc::new(MemoryBroker::default());
    let bus = ticks_bus(&broker);
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    bus.on::<PriceUpdate, _>(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    assert!(timeout(WAIT, bus.wait_for_active()).await.unwrap());
    broker.sever_sessions();

    let snapshot = wait_status(&bus, |s| {
        s.sessions_started >= 2 && s.state == LoopState::Active
    })
    .await;
    assert!(snapshot.restarts >= 1);
    assert_eq!(broker.subscriber_count("ticks"), 1);

    bus.publish(&price(1)).await.unwrap();
    wait_status(&bus, |s| s.messages_routed == 1).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    bus.shutdown_and_wait().await;
}

#[tokio::test]
async fn test_restart_after_broker_closes_channel() {
    let broker = Arc::new(MemoryBroker::default());
    let bus = ticks_bus(&broker);
    assert!(timeout(WAIT, bus.wait_for_active()).await.unwrap());

    broker.close_channel("ticks");
    wait_status(&bus, |s| {
        s.sessions_started >= 2 && s.state == LoopState::Active
    })
    .await;

    bus.shutdown_and_wait().await;
}

/// Тест проверяет восстановление после недоступности брокера: пока брокер
/// лежит, цикл повторяет попытки с задержкой; после возврата снова Active.
#[tokio::test]
async fn test_recovers_after_outage_with_backoff() {
    let broker = Arc::new(MemoryBroker::default());
    let bus = BusBuilder::new("ticks")
        .variant::<PriceUpdate>()
        .restart_backoff(RestartBackoff {
            first: Duration::from_millis(5),
            max: Duration::from_millis(20),
            factor: 2.0,
            jitter: 0.0,
        })
        .build(Arc::new(broker.pool()))
        .unwrap();
    assert!(timeout(WAIT, bus.wait_for_active()).await.unwrap());

    broker.set_available(false);
    wait_status(&bus, |s| s.restarts >= 3).await;

    // Публикация во время сбоя возвращает ошибку вызывающему.
    let err = bus.publish(&price(1)).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::PublishFailed);

    broker.set_available(true);
    wait_status(&bus, |s| {
        s.sessions_started >= 2 && s.state == LoopState::Active
    })
    .await;

    bus.publish(&price(2)).await.unwrap();
    wait_status(&bus, |s| s.messages_routed == 1).await;
    bus.shutdown_and_wait().await;
    assert_eq!(broker.leased(), 0);
}

/// Тест проверяет, что ошибка UNSUBSCRIBE при разборе сессии не мешает
/// перезапуску.
#[tokio::test]
async fn test_unsubscribe_failure_does_not_block_restart() {
    let broker = Arc::new(MemoryBroker::default());
    broker.set_fail_unsubscribe(true);
    let bus = ticks_bus(&broker);
    assert!(timeout(WAIT, bus.wait_for_active()).await.unwrap());

    broker.sever_sessions();
    wait_status(&bus, |s| {
        s.sessions_started >= 2 && s.state == LoopState::Active
    })
    .await;

    timeout(WAIT, bus.shutdown_and_wait()).await.unwrap();
    assert_eq!(broker.leased(), 0);
}

/// Тест проверяет, что после shutdown сообщения больше не маршрутизируются,
/// а повторный shutdown безопасен.
#[tokio::test]
async fn test_no_routing_after_shutdown() {
    let broker = Arc::new(MemoryBroker::default());
    let bus = ticks_bus(&broker);
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    bus.on::<PriceUpdate, _>(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    assert!(timeout(WAIT, bus.wait_for_active()).await.unwrap());
    bus.publish(&price(1)).await.unwrap();
    wait_status(&bus, |s| s.messages_routed == 1).await;

    bus.shutdown();
    bus.shutdown();
    timeout(WAIT, bus.shutdown_and_wait()).await.unwrap();
    assert!(bus.is_shutdown());
    assert_eq!(bus.status().state, LoopState::Terminated);

    for n in 0..5 {
        bus.publish(&price(n)).await.unwrap();
    }
    sleep(Duration::from_millis(50)).await;

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(bus.status().messages_routed, 1);
    assert_eq!(broker.subscriber_count("ticks"), 0);
    assert_eq!(broker.leased(), 0);
}

/// Тест проверяет, что битые и неизвестные конверты отбрасываются, а
/// сессия продолжает работать.
#[tokio::test]
async fn test_decode_failures_keep_session() {
    let broker = Arc::new(MemoryBroker::default());
    let bus = ticks_bus(&broker);
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    bus.on::<PriceUpdate, _>(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    assert!(timeout(WAIT, bus.wait_for_active()).await.unwrap());
    broker.publish("ticks", "{garbage");
    broker.publish("ticks", r#"{"type":"Liquidation","data":{}}"#);
    broker.publish("ticks", r#"{"type":"PriceUpdate","data":{"symbol":"X"}}"#);
    bus.publish(&price(3)).await.unwrap();

    let snapshot = wait_status(&bus, |s| s.messages_routed == 1).await;
    assert_eq!(snapshot.decode_failures, 3);
    assert_eq!(snapshot.sessions_started, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    bus.shutdown_and_wait().await;
}

/// Тест проверяет, что паника слушателя не убивает цикл и не мешает
/// остальным слушателям.
#[tokio::test]
async fn test_panicking_listener_is_isolated() {
    let broker = Arc::new(MemoryBroker::default());
    let bus = ticks_bus(&broker);
    let hits = Arc::new(AtomicUsize::new(0));

    bus.on::<PriceUpdate, _>(|m| {
        if m.price == 1 {
            panic!("listener failure");
        }
    })
    .unwrap();
    let counter = hits.clone();
    bus.on::<PriceUpdate, _>(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    assert!(timeout(WAIT, bus.wait_for_active()).await.unwrap());
    bus.publish(&price(1)).await.unwrap();
    bus.publish(&price(2)).await.unwrap();

    let snapshot = wait_status(&bus, |s| s.messages_routed == 2).await;
    assert_eq!(snapshot.sessions_started, 1);
    assert_eq!(snapshot.state, LoopState::Active);
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    bus.shutdown_and_wait().await;
}

/// Тест проверяет, что слушатель, добавленный во время работы, начинает
/// получать сообщения, а удалённый перестаёт.
#[tokio::test]
async fn test_listeners_change_at_runtime() {
    let broker = Arc::new(MemoryBroker::default());
    let bus = ticks_bus(&broker);
    assert!(timeout(WAIT, bus.wait_for_active()).await.unwrap());

    bus.publish(&price(1)).await.unwrap();
    wait_status(&bus, |s| s.messages_routed == 1).await;

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let id = bus
        .on::<PriceUpdate, _>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    bus.publish(&price(2)).await.unwrap();
    wait_status(&bus, |s| s.messages_routed == 2).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(bus.remove_listener(id));
    bus.publish(&price(3)).await.unwrap();
    wait_status(&bus, |s| s.messages_routed == 3).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    bus.shutdown_and_wait().await;
}
