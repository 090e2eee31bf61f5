//! End-to-end flow over the in-memory collaborators: the user joins voice,
//! the primary agent follows and greets, the user leaves and the pool
//! disconnects once the grace period runs out.

use chorus_core::testing::{FakeStatusSource, FakeTransport, Harness};
use chorus_core::{
    Agent, AgentPool, PresenceMonitor, PresenceSnapshot, SchedulingPolicy, SchedulingSettings,
    SharedPresence,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn snapshot(voice: Option<u64>, activity: Option<&str>) -> Option<PresenceSnapshot> {
    Some(PresenceSnapshot {
        online: true,
        activity: activity.map(str::to_string),
        voice_channel: voice,
    })
}

struct World {
    harness: Harness,
    transport: Arc<FakeTransport>,
    source: Arc<FakeStatusSource>,
    pool: Arc<AgentPool>,
    state: SharedPresence,
    cancel: CancellationToken,
}

fn world(agents: usize) -> World {
    let harness = Harness::new();
    let transport = FakeTransport::new();
    let cancel = CancellationToken::new();
    let agents: Vec<Arc<Agent>> = (0..agents)
        .map(|i| Arc::new(harness.agent(i, &transport).with_cancellation(&cancel)))
        .collect();
    let pool = Arc::new(AgentPool::new(agents, harness.personas.personas()));
    World {
        harness,
        transport,
        source: FakeStatusSource::new(),
        pool,
        state: SharedPresence::default(),
        cancel,
    }
}

#[tokio::test(start_paused = true)]
async fn test_follow_greet_and_leave() {
    let w = world(2);
    w.harness.generator.reply("お、来たね！");
    for agent in w.pool.agents() {
        agent.spawn_dispatch();
    }

    let monitor = Arc::new(PresenceMonitor::new(
        42,
        w.source.clone(),
        w.pool.clone(),
        w.state.clone(),
    ));
    let monitor_task = tokio::spawn(monitor.clone().run(w.cancel.clone()));

    w.source.set(snapshot(Some(500), Some("Minecraft")));
    // first poll at t=0, join after 5s, dispatch tick within 1s
    tokio::time::sleep(Duration::from_secs(8)).await;

    assert_eq!(w.transport.connects(), vec![500]);
    assert_eq!(w.pool.primary().unwrap().connected_channel(), Some(500));
    assert!(!w.pool.get(1).unwrap().is_connected());

    let requests = w.harness.generator.requests();
    assert_eq!(requests[0].activity.as_deref(), Some("Minecraft"));
    assert_eq!(w.transport.played().len(), 1);
    assert_eq!(w.harness.conversation.recent(1)[0].text, "お、来たね！");

    w.source.set(snapshot(None, Some("Minecraft")));
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(w.pool.primary().unwrap().is_connected());

    tokio::time::sleep(Duration::from_secs(70)).await;
    assert!(w.pool.connected().is_empty());
    assert_eq!(w.transport.disconnects(), vec![500]);

    w.cancel.cancel();
    monitor_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_returning_within_grace_keeps_connection() {
    let w = world(1);
    let monitor = PresenceMonitor::new(42, w.source.clone(), w.pool.clone(), w.state.clone());

    w.source.set(snapshot(Some(500), None));
    monitor.tick().await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(w.pool.primary().unwrap().is_connected());

    w.source.set(snapshot(None, None));
    monitor.tick().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    w.source.set(snapshot(Some(500), None));
    monitor.tick().await;
    tokio::time::sleep(Duration::from_secs(200)).await;
    monitor.tick().await;

    assert!(w.pool.primary().unwrap().is_connected());
    assert_eq!(w.transport.connects(), vec![500]);
    assert!(w.transport.disconnects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_autonomous_join_while_user_idle() {
    let w = world(3);
    let settings = SchedulingSettings::default().with_voice_channel(Some(700));
    let policy = Arc::new(SchedulingPolicy::new(w.pool.clone(), w.state.clone(), settings));
    let monitor = PresenceMonitor::new(42, w.source.clone(), w.pool.clone(), w.state.clone());

    w.source.set(snapshot(None, None));
    monitor.tick().await;

    let join_task = policy.spawn_autonomous_join(w.cancel.clone());
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(w.transport.connects(), vec![700]);
    assert_eq!(w.pool.connected().len(), 1);

    // next checks at 5 and 10 minutes fall inside the cooldown
    tokio::time::sleep(Duration::from_secs(10 * 60)).await;
    assert_eq!(w.transport.connects().len(), 1);

    w.cancel.cancel();
    join_task.await.unwrap();
}
