// End-to-end tests for the session engine against an in-memory transport.
//
// The fake transport records every frame together with the endpoint it was
// sent to, counts channel opens, and follows a per-send failure script so
// tests can inject transport errors at exact points in the command stream.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Barrier;

use wemo_teleop::{
    Channel, ChannelError, ChannelFactory, RobotEndpoint, RobotIdentity, SessionState,
    TeleopConfig, TeleopError, TeleopService,
};

#[derive(Default)]
struct FakeNet {
    // (endpoint host, frame) in send order
    frames: Mutex<Vec<(String, Vec<u8>)>>,
    opens: AtomicUsize,
    // Per-send script, popped front to back; true = fail that send
    send_plan: Mutex<VecDeque<bool>>,
    fail_opens: AtomicBool,
}

impl FakeNet {
    fn fail_next_sends(&self, count: usize) {
        self.send_plan
            .lock()
            .unwrap()
            .extend(std::iter::repeat_n(true, count));
    }

    fn frames_for(&self, host: &str) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    fn all_frames(&self) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

struct FakeChannel {
    net: Arc<FakeNet>,
    host: String,
}

#[async_trait]
impl Channel for FakeChannel {
    async fn send(&mut self, frame: &[u8]) -> Result<(), ChannelError> {
        let fail = self
            .net
            .send_plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(false);
        if fail {
            return Err(ChannelError::Closed);
        }
        self.net
            .frames
            .lock()
            .unwrap()
            .push((self.host.clone(), frame.to_vec()));
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }
}

struct FakeFactory {
    net: Arc<FakeNet>,
}

#[async_trait]
impl ChannelFactory for FakeFactory {
    async fn open(&self, endpoint: &RobotEndpoint) -> Result<Box<dyn Channel>, ChannelError> {
        if self.net.fail_opens.load(Ordering::SeqCst) {
            return Err(ChannelError::ConnectFailed {
                endpoint: endpoint.to_string(),
                reason: "host unreachable".to_string(),
            });
        }
        self.net.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeChannel {
            net: self.net.clone(),
            host: endpoint.host.clone(),
        }))
    }
}

// Same subscriber setup the runtime uses; set RUST_LOG to see engine logs
// while a test runs. First caller wins, later calls are no-ops.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn service() -> (TeleopService, Arc<FakeNet>) {
    init_tracing();
    let net = Arc::new(FakeNet::default());
    let factory = Arc::new(FakeFactory { net: net.clone() });
    (TeleopService::new(TeleopConfig::new("10.8.0", 22), factory), net)
}

const UP_FRAME: &[u8] = b"\x1bOA\x1bOA\x1bOA\x1bOA\x1bOA";
const DOWN_FRAME: &[u8] = b"\x1bOB\x1bOB\x1bOB\x1bOB\x1bOB";

#[tokio::test]
async fn test_full_drive_scenario() {
    let (svc, net) = service();
    let robot = RobotIdentity::new(1);

    let started = svc.start_session(robot).await.unwrap();
    let id = started.session_id;

    svc.move_robot(id, "up").await.unwrap();

    // Default 5, step 1, max 7: three increases clamp at 7
    assert_eq!(svc.change_speed(id, "increase").await.unwrap().speed, 6);
    assert_eq!(svc.change_speed(id, "increase").await.unwrap().speed, 7);
    assert_eq!(svc.change_speed(id, "increase").await.unwrap().speed, 7);
    assert_eq!(svc.get_speed(id).await.unwrap().speed, 7);

    assert_eq!(
        net.frames_for("10.8.0.101"),
        vec![UP_FRAME.to_vec(), b"+".to_vec(), b"+".to_vec(), b"+".to_vec()]
    );

    svc.end_session(id).await.unwrap();
    assert!(matches!(
        svc.get_speed(id).await,
        Err(TeleopError::SessionNotFound { .. })
    ));
    assert!(svc.active_sessions().is_empty());
}

#[tokio::test]
async fn test_duplicate_start_is_conflict_without_second_channel() {
    let (svc, net) = service();
    let robot = RobotIdentity::new(2);

    svc.start_session(robot).await.unwrap();
    assert_eq!(net.opens(), 1);

    let second = svc.start_session(robot).await;
    assert!(matches!(second, Err(TeleopError::SessionConflict { .. })));
    assert_eq!(net.opens(), 1, "conflicting start must not open a channel");
}

#[tokio::test]
async fn test_concurrent_creates_exactly_one_succeeds() {
    let (svc, net) = service();
    let svc = Arc::new(svc);
    let robot = RobotIdentity::new(3);
    let barrier = Arc::new(Barrier::new(8));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let svc = svc.clone();
        let barrier = barrier.clone();
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            svc.start_session(robot).await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(TeleopError::SessionConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(net.opens(), 1);
    assert_eq!(svc.active_sessions().len(), 1);
}

#[tokio::test]
async fn test_commands_execute_in_submission_order() {
    let (svc, net) = service();
    let id = svc
        .start_session(RobotIdentity::new(4))
        .await
        .unwrap()
        .session_id;

    // Concurrently polled, but enqueued in this order
    let (r1, r2, r3) = tokio::join!(
        svc.move_robot(id, "up"),
        svc.rotate(id, "left"),
        svc.move_robot(id, "down"),
    );
    r1.unwrap();
    r2.unwrap();
    r3.unwrap();

    assert_eq!(
        net.all_frames(),
        vec![UP_FRAME.to_vec(), b"<<<<<".to_vec(), DOWN_FRAME.to_vec()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_midstream_failure_preserves_order() {
    let (svc, net) = service();
    let id = svc
        .start_session(RobotIdentity::new(5))
        .await
        .unwrap()
        .session_id;

    // Command 1 goes through, command 2 fails its initial send and all
    // retries, command 3 must still run afterwards
    net.send_plan
        .lock()
        .unwrap()
        .extend([false, true, true, true, true]);

    let (r1, r2, r3) = tokio::join!(
        svc.move_robot(id, "up"),
        svc.rotate(id, "left"),
        svc.move_robot(id, "down"),
    );

    r1.unwrap();
    assert!(matches!(r2, Err(TeleopError::Transport { attempts: 4, .. })));
    r3.unwrap();

    // The rotation never hit the wire; ordering of the others is intact
    assert_eq!(net.all_frames(), vec![UP_FRAME.to_vec(), DOWN_FRAME.to_vec()]);

    // One open at start, one per retry of command 2, one for command 3
    assert_eq!(net.opens(), 5);

    // Command 3's successful send recovered the session
    assert_eq!(
        svc.session_status(id).unwrap().session_status,
        SessionState::Active
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_exhaustion_closes_session() {
    let (svc, net) = service();
    let robot = RobotIdentity::new(6);
    let id = svc.start_session(robot).await.unwrap().session_id;

    net.fail_next_sends(100);

    // First exhaustion: degraded
    let first = svc.move_robot(id, "up").await;
    assert!(matches!(first, Err(TeleopError::Transport { .. })));
    assert_eq!(
        svc.session_status(id).unwrap().session_status,
        SessionState::Degraded
    );
    assert_eq!(svc.active_sessions().len(), 1, "degraded is still live");

    // Second exhaustion while degraded: closed for good
    let second = svc.move_robot(id, "up").await;
    assert!(matches!(second, Err(TeleopError::Transport { .. })));
    assert_eq!(
        svc.session_status(id).unwrap().session_status,
        SessionState::Closed
    );
    assert!(svc.active_sessions().is_empty());

    // Closed sessions never come back; commands see SessionNotFound
    assert!(matches!(
        svc.get_speed(id).await,
        Err(TeleopError::SessionNotFound { .. })
    ));

    // The robot itself is reclaimable
    net.send_plan.lock().unwrap().clear();
    let fresh = svc.start_session(robot).await.unwrap();
    assert_ne!(fresh.session_id, id);
    svc.move_robot(fresh.session_id, "up").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fatally_closed_entry_is_pruned_on_lookup() {
    let (svc, net) = service();
    let id = svc
        .start_session(RobotIdentity::new(14))
        .await
        .unwrap()
        .session_id;

    // Two exhaustions close the session for good
    net.fail_next_sends(100);
    let _ = svc.move_robot(id, "up").await;
    let _ = svc.move_robot(id, "up").await;

    // The first lookup drops the dead entry instead of leaving it for the
    // next create on the same robot
    assert!(svc.registry().get(id).is_err());
    assert!(matches!(
        svc.session_status(id),
        Err(TeleopError::SessionNotFound { .. })
    ));
    assert!(svc.active_sessions().is_empty());
}

#[tokio::test]
async fn test_end_session_unknown_id_has_no_side_effects() {
    let (svc_a, _) = service();
    let (svc_b, net_b) = service();

    // An id allocated by a different registry is unknown here
    let foreign = svc_a
        .start_session(RobotIdentity::new(7))
        .await
        .unwrap()
        .session_id;
    assert!(matches!(
        svc_b.end_session(foreign).await,
        Err(TeleopError::SessionNotFound { .. })
    ));
    assert_eq!(net_b.opens(), 0);

    // Ending twice: the second call finds nothing
    let id = svc_b
        .start_session(RobotIdentity::new(8))
        .await
        .unwrap()
        .session_id;
    svc_b.end_session(id).await.unwrap();
    assert!(matches!(
        svc_b.end_session(id).await,
        Err(TeleopError::SessionNotFound { .. })
    ));
}

#[tokio::test]
async fn test_invalid_input_rejected_before_dispatch() {
    let (svc, net) = service();
    let id = svc
        .start_session(RobotIdentity::new(9))
        .await
        .unwrap()
        .session_id;

    assert!(matches!(
        svc.move_robot(id, "sideways").await,
        Err(TeleopError::InvalidCommand { .. })
    ));
    assert!(matches!(
        svc.rotate(id, "up").await,
        Err(TeleopError::InvalidCommand { .. })
    ));
    assert!(matches!(
        svc.change_speed(id, "turbo").await,
        Err(TeleopError::InvalidCommand { .. })
    ));
    assert!(net.all_frames().is_empty(), "invalid input must not reach the wire");
}

#[tokio::test]
async fn test_sessions_for_different_robots_are_independent() {
    let (svc, net) = service();
    let id_a = svc
        .start_session(RobotIdentity::new(10))
        .await
        .unwrap()
        .session_id;
    let id_b = svc
        .start_session(RobotIdentity::new(11))
        .await
        .unwrap()
        .session_id;

    let (ra, rb) = tokio::join!(svc.move_robot(id_a, "up"), svc.move_robot(id_b, "down"));
    ra.unwrap();
    rb.unwrap();

    assert_eq!(net.frames_for("10.8.0.110"), vec![UP_FRAME.to_vec()]);
    assert_eq!(net.frames_for("10.8.0.111"), vec![DOWN_FRAME.to_vec()]);

    // Closing one leaves the other untouched
    svc.end_session(id_a).await.unwrap();
    svc.get_speed(id_b).await.unwrap();
    assert_eq!(svc.active_sessions().len(), 1);
}

#[tokio::test]
async fn test_failed_connect_surfaces_transport_and_frees_robot() {
    let (svc, net) = service();
    let robot = RobotIdentity::new(12);

    net.fail_opens.store(true, Ordering::SeqCst);
    assert!(matches!(
        svc.start_session(robot).await,
        Err(TeleopError::Transport { .. })
    ));

    // The failed create must not leave the robot reserved
    net.fail_opens.store(false, Ordering::SeqCst);
    svc.start_session(robot).await.unwrap();
}

#[tokio::test]
async fn test_last_activity_tracks_successful_dispatch() {
    let (svc, _) = service();
    let id = svc
        .start_session(RobotIdentity::new(13))
        .await
        .unwrap()
        .session_id;

    let handle = svc.registry().get(id).unwrap();
    let created = handle.meta().created_at();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    svc.move_robot(id, "up").await.unwrap();
    assert!(handle.meta().last_activity_at() > created);
}
