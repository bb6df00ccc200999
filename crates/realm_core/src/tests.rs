
// Include tests
#[cfg(test)]
mod tests {
    use crate::connection::{event_channel, ConnectionEvent, TcpConnection};
    use crate::test_support::{next_event, next_record, Recorded, RecordingHandler, WAIT};
    use crate::*;
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout, Duration};

    fn test_config(max_users: usize) -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1:0".parse().expect("loopback address"),
            max_users,
            max_connections: max_users + 4,
            cleanup_interval_ms: 0,
            ..Default::default()
        }
    }

    async fn start(
        config: ServerConfig,
        handler: RecordingHandler,
    ) -> (ServerHandle, JoinHandle<Server<RecordingHandler>>) {
        let mut server = Server::bind(config, handler).await.expect("bind server");
        let handle = server.handle();
        let task = tokio::spawn(async move {
            server.run().await.expect("server run");
            server
        });
        (handle, task)
    }

    async fn stop(
        handle: &ServerHandle,
        task: JoinHandle<Server<RecordingHandler>>,
    ) -> Server<RecordingHandler> {
        handle.shutdown();
        timeout(WAIT, task)
            .await
            .expect("server stopped in time")
            .expect("server task")
    }

    /// Sends `payload` and waits for the echo.
    async fn echo(client: &mut TcpStream, payload: &[u8]) {
        client.write_all(payload).await.expect("client write");
        let mut reply = vec![0u8; payload.len()];
        timeout(WAIT, client.read_exact(&mut reply))
            .await
            .expect("echo in time")
            .expect("client read");
        assert_eq!(reply, payload);
    }

    /// Waits until the server closes `client`.
    async fn expect_eof(client: &mut TcpStream) {
        let mut buf = [0u8; 16];
        let read = timeout(WAIT, client.read(&mut buf))
            .await
            .expect("close in time")
            .unwrap_or(0);
        assert_eq!(read, 0);
    }

    async fn wait_for_sessions(handle: &ServerHandle, expected: usize) {
        timeout(WAIT, async {
            while handle.session_count() != expected {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session count reached");
    }

    async fn connect(addr: SocketAddr) -> TcpStream {
        TcpStream::connect(addr).await.expect("client connect")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_capacity_one_scenario() {
        let (handler, mut records) = RecordingHandler::new(true);
        let (handle, task) = start(test_config(1), handler.echoing()).await;

        let mut a = connect(handle.local_addr()).await;
        assert_eq!(next_record(&mut records).await, Recorded::Connect(UserId::new(0)));
        echo(&mut a, b"from a").await;
        next_record(&mut records).await;
        assert_eq!(handle.session_count(), 1);

        let mut b = connect(handle.local_addr()).await;
        expect_eof(&mut b).await;
        assert_eq!(handle.session_count(), 1);

        drop(a);
        assert_eq!(next_record(&mut records).await, Recorded::Close(UserId::new(0)));
        wait_for_sessions(&handle, 0).await;

        let mut b = connect(handle.local_addr()).await;
        assert_eq!(next_record(&mut records).await, Recorded::Connect(UserId::new(0)));
        echo(&mut b, b"from b").await;
        assert_eq!(handle.session_count(), 1);

        let server = stop(&handle, task).await;
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejected_connection_releases_its_id() {
        let (handler, mut records) = RecordingHandler::new(true);
        let (handle, task) = start(test_config(2), handler.echoing().rejecting_first(1)).await;

        let mut c = connect(handle.local_addr()).await;
        assert_eq!(next_record(&mut records).await, Recorded::Connect(UserId::new(0)));
        expect_eof(&mut c).await;
        assert_eq!(handle.session_count(), 0);

        let mut clients = Vec::new();
        let mut ids = HashSet::new();
        for _ in 0..2 {
            let mut client = connect(handle.local_addr()).await;
            match next_record(&mut records).await {
                Recorded::Connect(id) => assert!(ids.insert(id)),
                other => panic!("unexpected record {other:?}"),
            }
            echo(&mut client, b"ok").await;
            next_record(&mut records).await;
            clients.push(client);
        }
        assert_eq!(ids, HashSet::from([UserId::new(0), UserId::new(1)]));
        assert_eq!(handle.session_count(), 2);

        stop(&handle, task).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_side_disconnect_fires_close_once() {
        let (handler, mut records) = RecordingHandler::new(true);
        let (handle, task) = start(test_config(1), handler).await;

        let mut client = connect(handle.local_addr()).await;
        assert_eq!(next_record(&mut records).await, Recorded::Connect(UserId::new(0)));

        let mut server = stop(&handle, task).await;
        assert_eq!(next_record(&mut records).await, Recorded::Close(UserId::new(0)));
        expect_eof(&mut client).await;
        assert!(handle.shutdown_state().is_shutdown_complete());

        server.cleanup().await;
        assert_eq!(next_record(&mut records).await, Recorded::Cleanup(0));
        assert!(records.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_closes_every_session() {
        let (handler, mut records) = RecordingHandler::new(true);
        let (handle, task) = start(test_config(3), handler).await;

        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(connect(handle.local_addr()).await);
            next_record(&mut records).await;
        }
        wait_for_sessions(&handle, 3).await;

        let server = stop(&handle, task).await;
        assert_eq!(server.session_count(), 0);
        assert!(server.dispatcher().connections().is_empty());

        let mut closed = HashSet::new();
        for _ in 0..3 {
            match next_record(&mut records).await {
                Recorded::Close(id) => assert!(closed.insert(id)),
                other => panic!("unexpected record {other:?}"),
            }
        }
        for client in &mut clients {
            expect_eof(client).await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cleanup_timer_calls_handler() {
        let (handler, mut records) = RecordingHandler::new(true);
        let config = ServerConfig {
            cleanup_interval_ms: 20,
            ..test_config(1)
        };
        let (handle, task) = start(config, handler).await;

        assert!(matches!(next_record(&mut records).await, Recorded::Cleanup(0)));
        stop(&handle, task).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_client_connection_against_server() {
        let (handler, mut records) = RecordingHandler::new(true);
        let (handle, task) = start(test_config(1), handler.echoing()).await;

        let (events, mut rx) = event_channel();
        let client = TcpConnection::new(events, 1024);
        client.connect(handle.local_addr()).expect("idle connection");
        client.queue_receive().expect("connecting");
        client.send(b"hello realm".to_vec()).expect("connecting");

        assert!(matches!(next_event(&mut rx).await, ConnectionEvent::Connected(_)));
        let mut echoed = Vec::new();
        while echoed.len() < b"hello realm".len() {
            match next_event(&mut rx).await {
                ConnectionEvent::Received(_, payload) => {
                    echoed.extend(payload);
                    // Also keeps a read armed to observe the server's close
                    client.queue_receive().expect("open");
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(echoed, b"hello realm");
        assert_eq!(next_record(&mut records).await, Recorded::Connect(UserId::new(0)));

        stop(&handle, task).await;
        assert!(matches!(next_event(&mut rx).await, ConnectionEvent::Closed(..)));
        assert!(!client.is_open());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_config_is_rejected_before_binding() {
        let (handler, _records) = RecordingHandler::new(true);
        let config = ServerConfig {
            max_users: 0,
            ..test_config(1)
        };
        assert!(matches!(
            Server::bind(config, handler).await,
            Err(ServerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_udp_echo_round_trip() {
        let (server, mut inbox) = UdpConnection::bind(
            "127.0.0.1:0".parse().expect("addr"),
            UdpOptions::default(),
        )
        .await
        .expect("bind server socket");
        let (client, mut replies) = UdpConnection::bind(
            "127.0.0.1:0".parse().expect("addr"),
            UdpOptions::default(),
        )
        .await
        .expect("bind client socket");
        server.queue_receive_from();
        client.queue_receive_from();

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let responder = server.clone();
        tokio::spawn(async move {
            while let Some(datagram) = inbox.recv().await {
                let _ = responder.send_to(datagram.from, &datagram.payload);
                let _ = done_tx.send(datagram.from);
            }
        });

        client
            .send_to(server.local_addr(), b"datagram")
            .expect("payload fits");
        let reply = timeout(WAIT, replies.recv())
            .await
            .expect("reply in time")
            .expect("channel open");
        assert_eq!(reply.from, server.local_addr());
        assert_eq!(reply.payload, b"datagram");
        assert_eq!(done_rx.recv().await, Some(client.local_addr()));
    }
}
