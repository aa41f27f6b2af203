//! Per-message execution context.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::bus::ChannelName;
use crate::direction::{Direction, LogicalSide};
use crate::error::Error;
use crate::transport::{Connection, Player};
use crate::work::{run_captured, WorkFuture, WorkQueues};

use super::attribute::{Attribute, AttributeKey};
use super::dispatcher::{ConnectionDispatcher, PacketDispatcher};

/// Everything a handler needs while processing one inbound message.
///
/// Shared as `Arc<NetworkContext>`; the handled flag is the only mutable
/// state.
pub struct NetworkContext {
    connection: Weak<Connection>,
    direction: Direction,
    dispatcher: Arc<dyn PacketDispatcher>,
    work_queues: Arc<WorkQueues>,
    login_index: i32,
    packet_handled: AtomicBool,
}

impl NetworkContext {
    /// Context for a message that arrived on `connection` travelling in
    /// `direction`. Replies go back on `channel` in the reverse direction.
    pub fn new(
        connection: &Arc<Connection>,
        direction: Direction,
        channel: ChannelName,
        login_index: i32,
        work_queues: Arc<WorkQueues>,
    ) -> Self {
        let weak = Arc::downgrade(connection);
        let dispatcher = ConnectionDispatcher::new(weak.clone(), direction.reverse(), channel, login_index);
        Self::with_dispatcher(weak, direction, Arc::new(dispatcher), work_queues, login_index)
    }

    /// Context with a caller-supplied reply target.
    pub fn with_dispatcher(
        connection: Weak<Connection>,
        direction: Direction,
        dispatcher: Arc<dyn PacketDispatcher>,
        work_queues: Arc<WorkQueues>,
        login_index: i32,
    ) -> Self {
        Self {
            connection,
            direction,
            dispatcher,
            work_queues,
            login_index,
            packet_handled: AtomicBool::new(false),
        }
    }

    /// Direction the message travelled in.
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Side that received the message and must process it.
    #[inline]
    pub fn reception_side(&self) -> LogicalSide {
        self.direction.reception_side()
    }

    #[inline]
    pub fn dispatcher(&self) -> &Arc<dyn PacketDispatcher> {
        &self.dispatcher
    }

    #[inline]
    pub fn packet_handled(&self) -> bool {
        self.packet_handled.load(Ordering::Relaxed)
    }

    /// Last write wins; no ordering is implied relative to other memory.
    ///
    /// The endpoint reads the flag as soon as the listeners return. A
    /// handler that answers a login payload later, from
    /// [`enqueue_work`](Self::enqueue_work), must set it before returning,
    /// or the client sends an empty reply on the same index first.
    #[inline]
    pub fn set_packet_handled(&self, handled: bool) {
        self.packet_handled.store(handled, Ordering::Relaxed);
    }

    /// `-1` outside the login phase.
    #[inline]
    pub fn login_index(&self) -> i32 {
        self.login_index
    }

    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.upgrade()
    }

    /// Typed attribute of the connection, or `None` once it is gone.
    pub fn attr<T>(&self, key: &AttributeKey<T>) -> Option<Attribute<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let connection = self.connection.upgrade()?;
        Some(Attribute::new(connection.attributes().clone(), *key))
    }

    /// Player who sent the message.
    ///
    /// Only server-received messages on a connection in the play phase
    /// with a bound player produce a value.
    pub fn sender(&self) -> Option<Arc<Player>> {
        if self.reception_side() != LogicalSide::Server {
            return None;
        }
        self.connection.upgrade()?.player()
    }

    /// Run `task` on the worker of the receiving side.
    ///
    /// Already on that worker: the task runs now and the returned future
    /// is complete. Otherwise the task is queued and the future resolves
    /// once it has run. The caller never blocks.
    pub fn enqueue_work<F>(&self, task: F) -> WorkFuture
    where
        F: FnOnce() + Send + 'static,
    {
        let side = self.reception_side();
        let Some(executor) = self.work_queues.get(side) else {
            tracing::warn!("No worker for the {} side, dropping enqueued work", side);
            return WorkFuture::completed(Err(Error::NoWorker(side)));
        };

        if executor.is_on_thread() {
            WorkFuture::completed(run_captured(Box::new(task)))
        } else {
            executor.execute(Box::new(task))
        }
    }
}

impl fmt::Debug for NetworkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkContext")
            .field("direction", &self.direction)
            .field("login_index", &self.login_index)
            .field("packet_handled", &self.packet_handled())
            .field("connected", &(self.connection.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RecordingDispatcher;
    use crate::protocol::NO_LOGIN_INDEX;
    use crate::work::{TickQueue, WorkQueue};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::thread;

    fn detached(direction: Direction, queues: WorkQueues) -> NetworkContext {
        NetworkContext::with_dispatcher(
            Weak::new(),
            direction,
            Arc::new(RecordingDispatcher::new(direction.reverse())),
            Arc::new(queues),
            NO_LOGIN_INDEX,
        )
    }

    #[test]
    fn test_handled_flag_defaults_false() {
        let ctx = detached(Direction::ToServer, WorkQueues::new());
        assert!(!ctx.packet_handled());

        ctx.set_packet_handled(true);
        assert!(ctx.packet_handled());
        ctx.set_packet_handled(false);
        assert!(!ctx.packet_handled());
    }

    #[test]
    fn test_handled_flag_visible_across_threads() {
        let ctx = Arc::new(detached(Direction::ToClient, WorkQueues::new()));
        let remote = ctx.clone();
        thread::spawn(move || remote.set_packet_handled(true)).join().unwrap();
        assert!(ctx.packet_handled());
    }

    #[test]
    fn test_enqueue_inline_on_worker_thread() {
        let tick = TickQueue::for_current_thread();
        let ctx = detached(Direction::ToServer, WorkQueues::new().with_server(tick.clone()));

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let future = ctx.enqueue_work(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(future.is_ready());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(tick.run_pending(), 0);
        assert!(future.wait().is_ok());
    }

    #[test]
    fn test_enqueue_off_thread_runs_on_worker() {
        let queue = WorkQueue::spawn("test-server-worker").unwrap();
        let ctx = detached(Direction::ToServer, WorkQueues::new().with_server(queue.clone()));

        let observed = Arc::new(Mutex::new(None));
        let slot = observed.clone();
        let future = ctx.enqueue_work(move || {
            *slot.lock().unwrap() = thread::current().name().map(str::to_string);
        });

        assert!(!future.is_ready());
        future.wait().unwrap();
        assert_eq!(observed.lock().unwrap().as_deref(), Some("test-server-worker"));
        queue.shutdown();
    }

    #[test]
    fn test_sequential_enqueues_keep_order() {
        let queue = WorkQueue::spawn("test-order-worker").unwrap();
        let ctx = detached(Direction::ToServer, WorkQueues::new().with_server(queue.clone()));
        let order = Arc::new(Mutex::new(Vec::new()));

        for step in ["first", "second"] {
            let order = order.clone();
            ctx.enqueue_work(move || order.lock().unwrap().push(step)).wait().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        queue.shutdown();
    }

    #[test]
    fn test_enqueue_picks_reception_side() {
        let client = WorkQueue::spawn("test-client-worker").unwrap();
        let ctx = detached(Direction::ToClient, WorkQueues::new().with_client(client.clone()));
        assert!(ctx.enqueue_work(|| {}).wait().is_ok());

        let server_bound = detached(Direction::ToServer, WorkQueues::new().with_client(client.clone()));
        let result = server_bound.enqueue_work(|| {}).wait();
        assert!(matches!(result, Err(Error::NoWorker(LogicalSide::Server))));
        client.shutdown();
    }

    #[test]
    fn test_enqueue_captures_panic_inline() {
        let tick = TickQueue::for_current_thread();
        let ctx = detached(Direction::ToClient, WorkQueues::new().with_client(tick));

        let result = ctx.enqueue_work(|| panic!("handler bug")).wait();
        match result {
            Err(Error::TaskPanicked(message)) => assert_eq!(message, "handler bug"),
            other => panic!("expected TaskPanicked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_enqueue_future_is_awaitable() {
        let queue = WorkQueue::spawn("test-await-worker").unwrap();
        let ctx = detached(Direction::ToServer, WorkQueues::new().with_server(queue.clone()));

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        ctx.enqueue_work(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detached_context_has_no_connection_state() {
        const NAME: AttributeKey<String> = AttributeKey::new("name");
        let ctx = detached(Direction::ToServer, WorkQueues::new());

        assert!(ctx.connection().is_none());
        assert!(ctx.attr(&NAME).is_none());
        assert!(ctx.sender().is_none());
        assert_eq!(ctx.dispatcher().direction(), Direction::ToClient);
    }
}
