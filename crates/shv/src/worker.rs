//! The connection worker: transport bring-up, login handshake, the pump
//! loop and request dispatch. Runs on its own thread; the application
//! talks to it only through the shared running flag, the wake channel and
//! the recorded last error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use shv_rpc::{RequestHead, RpcErrorCode, message};
use shv_transport::{Ready, Transport, write_all};

use crate::com::{MsgReader, RequestScope};
use crate::connection::{Attention, AttentionCallback, ConnectionConfig};
use crate::error::{ConnectionError, Error};
use crate::tree::Node;

/// State shared between the worker and its [`DeviceConnection`] handle.
///
/// [`DeviceConnection`]: crate::DeviceConnection
pub(crate) struct Shared {
    pub running: AtomicBool,
    pub stopped: Mutex<bool>,
    pub stop_cv: Condvar,
    pub last_error: Mutex<Option<ConnectionError>>,
}

impl Shared {
    pub fn new() -> Self {
        Shared {
            running: AtomicBool::new(true),
            stopped: Mutex::new(false),
            stop_cv: Condvar::new(),
            last_error: Mutex::new(None),
        }
    }
}

enum ConnState {
    NotInit,
    NoConn,
    Conn,
}

#[derive(Debug)]
enum PumpExit {
    /// The broker closed the stream or the device asked to disconnect;
    /// subject to the reconnect policy.
    Eof,
    /// The running flag went down.
    Shutdown,
}

pub(crate) struct Worker {
    pub root: Node,
    pub link: MsgReader,
    pub cids: Vec<i64>,
    pub rid: i64,
    pub config: ConnectionConfig,
    pub shared: Arc<Shared>,
    pub attention: Option<AttentionCallback>,
    pub reconnects: u32,
    pub write_err: bool,
}

impl Worker {
    fn running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn transport(&mut self) -> &mut dyn Transport {
        self.link.get_mut().transport.as_mut()
    }

    fn notify(&self, reason: Attention) {
        if let Some(callback) = &self.attention {
            callback(reason);
        }
    }

    /// Thread entry point.
    pub fn run(&mut self) {
        if let Err(err) = self.process() {
            log::error!("connection worker terminated: {err}");
            *self.shared.last_error.lock().expect("last error lock") = Some(err);
            self.notify(Attention::Error);
        }
    }

    fn limit_reached(&self) -> bool {
        self.config.reconnect_retries > 0
            && self.reconnects >= self.config.reconnect_retries as u32
    }

    /// Park between reconnect attempts; shutdown cuts the sleep short.
    fn sleep_reconnect(&self) {
        let stopped = self.shared.stopped.lock().expect("stop lock");
        if !*stopped {
            let _ = self
                .shared
                .stop_cv
                .wait_timeout(stopped, self.config.reconnect_period)
                .expect("stop lock");
        }
    }

    /// The connection state machine: bring the transport up (retrying per
    /// the reconnect policy), run the session, reconnect after a clean
    /// disconnect.
    fn process(&mut self) -> Result<(), ConnectionError> {
        let mut state = ConnState::NotInit;

        while self.running() {
            match state {
                ConnState::NotInit => match self.transport().init() {
                    Ok(()) => state = ConnState::Conn,
                    Err(err) if err.is_retryable() => {
                        log::warn!("broker unreachable: {err}");
                        state = ConnState::NoConn;
                    }
                    Err(err) => return Err(ConnectionError::TransportInit(err.to_string())),
                },
                ConnState::NoConn => {
                    if self.limit_reached() {
                        log::error!("maximum number of reconnects reached");
                        return Err(ConnectionError::TooManyReconnects);
                    }
                    log::warn!(
                        "cannot connect to the broker, trying again in {} s",
                        self.config.reconnect_period.as_secs()
                    );
                    self.sleep_reconnect();
                    if !self.running() {
                        break;
                    }
                    match self.transport().init() {
                        Ok(()) => state = ConnState::Conn,
                        Err(err) if err.is_retryable() => {
                            self.reconnects += 1;
                            if self.limit_reached() {
                                log::error!("maximum number of reconnects reached");
                                return Err(ConnectionError::TooManyReconnects);
                            }
                        }
                        Err(err) => {
                            return Err(ConnectionError::TransportInit(err.to_string()));
                        }
                    }
                }
                ConnState::Conn => {
                    let outcome = self.communicate();
                    self.transport().close();
                    match outcome {
                        Ok(PumpExit::Shutdown) => return Ok(()),
                        Ok(PumpExit::Eof) => {
                            log::warn!("disconnected from the broker");
                            self.notify(Attention::Disconnected);
                            if self.limit_reached() {
                                log::error!("maximum number of reconnects reached");
                                return Err(ConnectionError::TooManyReconnects);
                            }
                            state = ConnState::NotInit;
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        self.transport().close();
        Ok(())
    }

    /// One connected session: login, then pump requests until EOF,
    /// shutdown or an error.
    fn communicate(&mut self) -> Result<PumpExit, ConnectionError> {
        self.write_err = false;
        self.link.reset();

        self.login()?;
        log::info!("logged in to the broker");
        self.notify(Attention::Connected);

        loop {
            if !self.running() {
                return Ok(PumpExit::Shutdown);
            }

            // Messages already pulled into the decode buffer come first;
            // the transport has no readiness to report for them.
            let ready = if self.link.has_buffered() {
                Ready::Readable
            } else {
                // Half the idle watchdog, so the broker sees a ping well
                // before it would drop us.
                let timeout = self.config.idle_timeout / 2;
                self.transport()
                    .data_ready(timeout)
                    .map_err(|e| ConnectionError::TransportRead(e.to_string()))?
            };

            match ready {
                Ready::Idle => {
                    if !self.running() {
                        return Ok(PumpExit::Shutdown);
                    }
                    self.send_ping()
                        .map_err(|e| ConnectionError::Pack(e.to_string()))?;
                }
                Ready::Readable => match self.process_input() {
                    Ok(true) => {}
                    Ok(false) => return Ok(PumpExit::Eof),
                    Err(err) => return Err(classify(err)),
                },
            }

            if self.write_err {
                return Err(ConnectionError::Pack("reply write failed".into()));
            }
        }
    }

    /// The `hello`/`login` handshake. Request ids 1 and 2 belong to it;
    /// both replies are read and discarded.
    fn login(&mut self) -> Result<(), ConnectionError> {
        if self.config.user.is_empty() || self.config.password.is_empty() {
            return Err(ConnectionError::Login("missing credentials".into()));
        }

        let login_err = |e: Error| ConnectionError::Login(e.to_string());

        let hello = message::request_empty(1, "hello", None)
            .map_err(|e| ConnectionError::Login(e.to_string()))?;
        self.send_frame(&hello).map_err(login_err)?;
        self.skip_reply().map_err(login_err)?;

        let config = &self.config;
        let login = message::request_with_params(2, "login", None, |w| {
            w.begin_map()?;

            w.write_str("login")?;
            w.begin_map()?;
            w.write_str("password")?;
            w.write_str(&config.password)?;
            w.write_str("type")?;
            w.write_str("PLAIN")?;
            w.write_str("user")?;
            w.write_str(&config.user)?;
            w.end_container()?;

            w.write_str("options")?;
            w.begin_map()?;
            w.write_str("device")?;
            w.begin_map()?;
            w.write_str("deviceId")?;
            w.write_str(&config.device_id)?;
            w.write_str("mountPoint")?;
            w.write_str(&config.mount_point)?;
            w.end_container()?;
            w.write_str("idleWatchDogTimeOut")?;
            w.write_int(config.idle_timeout.as_secs() as i64)?;
            w.end_container()?;

            w.end_container()
        })
        .map_err(|e| ConnectionError::Login(e.to_string()))?;
        self.send_frame(&login).map_err(login_err)?;
        self.skip_reply().map_err(login_err)?;

        self.rid = 3;
        Ok(())
    }

    /// Read one message and throw it away, keeping the stream in frame.
    fn skip_reply(&mut self) -> crate::Result<()> {
        shv_rpc::unpack_head(&mut self.link, &mut self.cids)?;
        self.link.skip_item()?;
        Ok(())
    }

    fn send_frame(&mut self, frame: &[u8]) -> crate::Result<()> {
        write_all(self.link.get_mut().transport.as_mut(), frame)?;
        Ok(())
    }

    /// Keep-alive towards the broker, with the per-connection request id
    /// counter.
    fn send_ping(&mut self) -> crate::Result<()> {
        let frame = message::request_empty(self.rid, "ping", Some(".broker/app"))?;
        self.rid += 1;
        self.send_frame(&frame)
    }

    /// Parse and serve everything currently buffered. `Ok(false)` means
    /// the stream ended (or a handler asked to disconnect).
    fn process_input(&mut self) -> crate::Result<bool> {
        loop {
            match shv_rpc::unpack_head(&mut self.link, &mut self.cids) {
                Ok(head) => {
                    if head.is_request() {
                        if !self.dispatch(head)? {
                            return Ok(false);
                        }
                    } else {
                        // A reply to one of our own requests (ping);
                        // nothing to do with it.
                        self.link.skip_item()?;
                    }
                }
                Err(err) if err.is_underflow() => return Ok(false),
                Err(err) => return Err(err.into()),
            }

            if !self.link.has_buffered() {
                return Ok(true);
            }
        }
    }

    /// Resolve the node and method, then let the handler consume the
    /// payload and reply. Returns `false` when the handler asked for a
    /// disconnect.
    fn dispatch(&mut self, head: RequestHead) -> crate::Result<bool> {
        let rid = head.rid;

        if head.path_overflow || head.method_overflow {
            self.link.skip_item()?;
            let msg = if head.path_overflow {
                "Requested path is too long."
            } else {
                "Requested method is too long."
            };
            return self
                .reply_error_direct(rid, RpcErrorCode::MethodCallException, Some(msg))
                .map(|()| true);
        }

        let mut disconnect = false;
        let Worker {
            root,
            link,
            cids,
            write_err,
            ..
        } = self;
        let mut scope = RequestScope {
            reader: link,
            cids: cids.as_slice(),
            write_err,
            disconnect: &mut disconnect,
        };

        match root.find_mut(&head.path) {
            None => {
                shv_rpc::read_param_number(scope.reader)?;
                let msg = format!("Node '{}' does not exist.", head.path);
                scope.reply_error(rid, RpcErrorCode::MethodCallException, Some(&msg))?;
            }
            Some(node) => match node.methods().lookup(&head.method) {
                None => {
                    shv_rpc::read_param_number(scope.reader)?;
                    let msg = format!("Method '{}' does not exist.", head.method);
                    scope.reply_error(rid, RpcErrorCode::MethodCallException, Some(&msg))?;
                }
                Some(desc) => (desc.handler)(&mut scope, node, rid)?,
            },
        }

        Ok(!disconnect)
    }

    /// Error reply outside of a request scope.
    fn reply_error_direct(
        &mut self,
        rid: i64,
        code: RpcErrorCode,
        msg: Option<&str>,
    ) -> crate::Result<()> {
        let frame = message::reply_error(rid, &self.cids, code, msg)?;
        if self.write_err {
            return Ok(());
        }
        if let Err(err) = write_all(self.link.get_mut().transport.as_mut(), &frame) {
            log::error!("reply write failed: {err}");
            self.write_err = true;
        }
        Ok(())
    }
}

fn classify(err: Error) -> ConnectionError {
    match err {
        Error::Codec(e) => ConnectionError::Unpack(e.to_string()),
        Error::Rpc(e) => ConnectionError::Unpack(e.to_string()),
        Error::Io(e) => ConnectionError::TransportRead(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use shv_chainpack::{ChainPackReader, Item};
    use shv_rpc::message;

    use crate::com::TransportLink;
    use crate::testing::{ScriptedTransport, decode_frames, payload_of};
    use crate::tree::{Children, Node};

    fn request(rid: i64, method: &str, path: &str, cids: &[i64]) -> Vec<u8> {
        message::build_frame(|w| {
            w.begin_meta()?;
            w.write_int(1)?;
            w.write_int(1)?;
            w.write_int(shv_rpc::TAG_REQUEST_ID)?;
            w.write_int(rid)?;
            if !path.is_empty() {
                w.write_int(shv_rpc::TAG_SHV_PATH)?;
                w.write_str(path)?;
            }
            w.write_int(shv_rpc::TAG_METHOD)?;
            w.write_str(method)?;
            if !cids.is_empty() {
                w.write_int(shv_rpc::TAG_CALLER_IDS)?;
                if cids.len() == 1 {
                    w.write_int(cids[0])?;
                } else {
                    w.begin_list()?;
                    for &cid in cids {
                        w.write_int(cid)?;
                    }
                    w.end_container()?;
                }
            }
            w.end_container()?;
            w.begin_imap()?;
            w.end_container()
        })
        .unwrap()
    }

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            user: "device".into(),
            password: "secret".into(),
            ..Default::default()
        }
    }

    /// Worker over a scripted transport: hello and login replies first,
    /// then the given request frames, then a clean EOF.
    fn worker_with(root: Node, requests: Vec<Vec<u8>>) -> (Worker, Arc<Mutex<Vec<u8>>>) {
        let mut reads = vec![
            message::reply_empty(1, &[]).unwrap(),
            message::reply_empty(2, &[]).unwrap(),
        ];
        reads.extend(requests);

        let transport = ScriptedTransport::new(reads);
        let written = transport.written_handle();
        let worker = Worker {
            root,
            link: ChainPackReader::new(TransportLink {
                transport: Box::new(transport),
            }),
            cids: Vec::new(),
            rid: 3,
            config: test_config(),
            shared: Arc::new(Shared::new()),
            attention: None,
            reconnects: 0,
            write_err: false,
        };
        (worker, written)
    }

    fn run_session(root: Node, requests: Vec<Vec<u8>>) -> Vec<Vec<Item>> {
        let (mut worker, written) = worker_with(root, requests);
        assert!(matches!(worker.communicate(), Ok(PumpExit::Eof)));
        let frames = decode_frames(&written.lock().unwrap());
        // Strip the hello and login request frames.
        frames[2..].to_vec()
    }

    fn two_children_root() -> Node {
        let mut root = Node::new("", &crate::methods::DIR_LS_DMAP, Children::tree());
        root.add_child(Node::new("a", &crate::methods::DIR_LS_DMAP, Children::array()));
        root.add_child(Node::new("b", &crate::methods::DIR_LS_DMAP, Children::array()));
        root
    }

    #[test]
    fn ls_on_root_lists_children() {
        let replies = run_session(two_children_root(), vec![request(5, "ls", "", &[])]);
        assert_eq!(replies.len(), 1);
        let payload = payload_of(&replies[0]);
        assert_eq!(payload[0], Item::IMapBegin);
        assert_eq!(payload[1], Item::Int(2));
        assert_eq!(payload[2], Item::ListBegin);
        match (&payload[3], &payload[4]) {
            (Item::String(a), Item::String(b)) => {
                assert_eq!(a.data, b"a");
                assert_eq!(b.data, b"b");
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(payload[5], Item::ContainerEnd);
        assert_eq!(payload[6], Item::ContainerEnd);
    }

    #[test]
    fn caller_ids_are_mirrored_in_order() {
        let replies = run_session(two_children_root(), vec![request(5, "ls", "", &[7, 9])]);
        let frame = &replies[0];
        // Meta: …, 11, [7, 9], …
        let tag_at = frame
            .iter()
            .position(|i| *i == Item::Int(shv_rpc::TAG_CALLER_IDS))
            .expect("caller ids tag");
        assert_eq!(frame[tag_at + 1], Item::ListBegin);
        assert_eq!(frame[tag_at + 2], Item::Int(7));
        assert_eq!(frame[tag_at + 3], Item::Int(9));
        assert_eq!(frame[tag_at + 4], Item::ContainerEnd);
    }

    #[test]
    fn unknown_method_and_missing_node_yield_exceptions() {
        let replies = run_session(
            two_children_root(),
            vec![
                request(1, "unknown", "a", &[]),
                request(2, "ls", "missing/deep", &[]),
            ],
        );
        for (frame, needle) in replies.iter().zip([
            &b"Method 'unknown' does not exist."[..],
            &b"Node 'missing/deep' does not exist."[..],
        ]) {
            let payload = payload_of(frame);
            assert_eq!(payload[1], Item::Int(3));
            assert_eq!(payload[3], Item::Int(1));
            assert_eq!(payload[4], Item::Int(8));
            match &payload[6] {
                Item::String(c) => assert_eq!(c.data, needle),
                other => panic!("unexpected message {other:?}"),
            }
        }
    }

    #[test]
    fn dir_reports_all_five_parameter_methods() {
        let value = Arc::new(Mutex::new(0.0));
        let mut root = Node::new("", &crate::methods::DIR_LS_DMAP, Children::tree());
        root.add_child(Node::typed_double("par", value));

        let replies = run_session(root, vec![request(4, "dir", "par", &[])]);
        let payload = payload_of(&replies[0]);
        let imaps = payload
            .iter()
            .filter(|i| matches!(i, Item::IMapBegin))
            .count();
        // The payload IMap plus one descriptor per method.
        assert_eq!(imaps, 1 + 5);
    }

    #[test]
    fn typed_set_stores_and_echoes() {
        let value = Arc::new(Mutex::new(0.0));
        let mut root = Node::new("", &crate::methods::DIR_LS_DMAP, Children::tree());
        root.add_child(Node::typed_double("par", value.clone()));

        let set = message::build_frame(|w| {
            shv_rpc::pack_request_head(w, 9, "set", Some("par"))?;
            w.begin_imap()?;
            w.write_int(1)?;
            w.write_double(2.5)?;
            w.end_container()
        })
        .unwrap();

        let replies = run_session(root, vec![set]);
        assert_eq!(*value.lock().unwrap(), 2.5);
        let payload = payload_of(&replies[0]);
        assert_eq!(payload[2], Item::Double(2.5));
    }

    #[test]
    fn login_requires_credentials() {
        let (mut worker, written) = worker_with(two_children_root(), vec![]);
        worker.config.user.clear();
        match worker.communicate() {
            Err(ConnectionError::Login(_)) => {}
            other => panic!("unexpected outcome {other:?}"),
        }
        // Nothing went out before the credential check.
        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn login_sends_watchdog_and_mount_point() {
        let (mut worker, written) = worker_with(two_children_root(), vec![]);
        assert!(matches!(worker.communicate(), Ok(PumpExit::Eof)));

        let frames = decode_frames(&written.lock().unwrap());
        let login = &frames[1];
        let has_str = |needle: &[u8]| {
            login
                .iter()
                .any(|i| matches!(i, Item::String(c) if c.data == needle))
        };
        assert!(has_str(b"idleWatchDogTimeOut"));
        assert!(has_str(b"test/pysim"));
        assert!(has_str(b"PLAIN"));
        assert!(login.contains(&Item::Int(360)));
    }

    #[test]
    fn reconnect_policy_gives_up_after_the_limit() {
        use shv_transport::InitError;

        fn flaky(fails: usize, then_ok: bool) -> ScriptedTransport {
            let mut t = ScriptedTransport::new(vec![]);
            for _ in 0..fails {
                t.init_results.push_back(Err(InitError::Unreachable(
                    std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                )));
            }
            if then_ok {
                t.init_results.push_back(Ok(()));
            }
            t
        }

        // Two retryable failures, success on the third attempt: the
        // session starts (login fails due to no credentials, which proves
        // CONNECTED was reached exactly once).
        let t = flaky(2, true);
        let mut worker = Worker {
            root: two_children_root(),
            link: ChainPackReader::new(TransportLink { transport: Box::new(t) }),
            cids: Vec::new(),
            rid: 3,
            config: ConnectionConfig {
                reconnect_period: std::time::Duration::from_millis(1),
                reconnect_retries: 2,
                ..Default::default()
            },
            shared: Arc::new(Shared::new()),
            attention: None,
            reconnects: 0,
            write_err: false,
        };
        assert!(matches!(
            worker.process(),
            Err(ConnectionError::Login(_))
        ));

        // Three failures exhaust retries=2.
        let t = flaky(3, false);
        let mut worker = Worker {
            root: two_children_root(),
            link: ChainPackReader::new(TransportLink { transport: Box::new(t) }),
            cids: Vec::new(),
            rid: 3,
            config: ConnectionConfig {
                reconnect_period: std::time::Duration::from_millis(1),
                reconnect_retries: 2,
                ..Default::default()
            },
            shared: Arc::new(Shared::new()),
            attention: None,
            reconnects: 0,
            write_err: false,
        };
        assert!(matches!(
            worker.process(),
            Err(ConnectionError::TooManyReconnects)
        ));
    }
}
