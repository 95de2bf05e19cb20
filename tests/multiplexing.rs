//! Connection tests against an in-process mock server.

use std::net::SocketAddr;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use zero_cql::constant::EventType;
use zero_cql::protocol::primitive::*;
use zero_cql::protocol::response::{ErrorDetail, Event};
use zero_cql::{CodecRegistry, Conn, Consistency, Error, Opts, Output, Value};

struct Request {
    stream_id: i8,
    opcode: u8,
    body: Vec<u8>,
}

async fn read_request(socket: &mut TcpStream) -> Option<Request> {
    let mut header = [0u8; 8];
    if socket.read_exact(&mut header).await.is_err() {
        return None;
    }
    assert_eq!(header[0], 0x01, "request version byte");
    let length = u32::from_be_bytes(header[4..8].try_into().unwrap()) as usize;
    let mut body = vec![0; length];
    socket.read_exact(&mut body).await.unwrap();
    Some(Request {
        stream_id: header[2] as i8,
        opcode: header[3],
        body,
    })
}

fn response(stream_id: i8, opcode: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![0x81, 0, stream_id as u8, opcode];
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Accept one connection and run `handler` on the raw socket. The handler
/// owns the whole exchange including STARTUP.
async fn spawn_raw_server<F, Fut>(handler: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        handler(socket).await;
    });
    (addr, task)
}

/// Like `spawn_raw_server` but answers STARTUP with READY before handing
/// the socket to `handler`.
async fn spawn_server<F, Fut>(handler: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    spawn_raw_server(|mut socket| async move {
        let startup = read_request(&mut socket).await.unwrap();
        assert_eq!(startup.opcode, 0x01);
        assert_eq!(startup.stream_id, 0);
        socket
            .write_all(&response(0, 0x02, &[]))
            .await
            .unwrap();
        handler(socket).await;
    })
    .await
}

async fn connect(addr: SocketAddr) -> Conn {
    connect_with(addr, Opts::default()).await
}

async fn connect_with(addr: SocketAddr, opts: Opts) -> Conn {
    let stream = TcpStream::connect(addr).await.unwrap();
    Conn::new_with_stream(stream, &opts, Arc::new(CodecRegistry::with_defaults()))
        .await
        .unwrap()
}

fn void_result() -> Vec<u8> {
    let mut body = Vec::new();
    write_int(&mut body, 1);
    body
}

#[tokio::test]
async fn responses_complete_out_of_order() {
    let (addr, server) = spawn_server(|mut socket| async move {
        let first = read_request(&mut socket).await.unwrap();
        let second = read_request(&mut socket).await.unwrap();
        // Answer in reverse arrival order; correlation is by stream id only.
        for req in [second, first] {
            let (cql, _) = read_long_string(&req.body).unwrap();
            let mut body = Vec::new();
            write_int(&mut body, 3); // set keyspace, echoing the query text
            write_string(&mut body, cql);
            socket
                .write_all(&response(req.stream_id, 0x08, &body))
                .await
                .unwrap();
        }
        let _ = read_request(&mut socket).await;
    })
    .await;

    let conn = connect(addr).await;
    let a = conn.begin_query("first", Consistency::One, false).unwrap();
    let b = conn.begin_query("second", Consistency::One, false).unwrap();
    assert_ne!(a.stream_id(), b.stream_id());

    match conn.end(a).await.unwrap() {
        Output::SetKeyspace(ks) => assert_eq!(ks, "first"),
        other => panic!("unexpected output {other:?}"),
    }
    match conn.end(b).await.unwrap() {
        Output::SetKeyspace(ks) => assert_eq!(ks, "second"),
        other => panic!("unexpected output {other:?}"),
    }

    drop(conn);
    server.await.unwrap();
}

#[tokio::test]
async fn pool_exhaustion_and_abort() {
    let (addr, _server) = spawn_server(|mut socket| async move {
        // Consume requests without ever answering.
        while read_request(&mut socket).await.is_some() {}
    })
    .await;

    let conn = connect(addr).await;
    let mut handles = Vec::new();
    for _ in 0..128 {
        handles.push(conn.begin_query("pending", Consistency::One, false).unwrap());
    }
    assert!(matches!(
        conn.begin_query("one too many", Consistency::One, false),
        Err(Error::Exhausted)
    ));

    // Aborting one pending request frees its id for reuse.
    let victim = handles.pop().unwrap();
    let id = victim.stream_id();
    assert!(conn.fail_pending(id));
    assert!(!conn.fail_pending(id));
    assert!(matches!(conn.end(victim).await, Err(Error::Aborted)));

    let reused = conn.begin_query("retry", Consistency::One, false).unwrap();
    assert_eq!(reused.stream_id(), id);
}

#[tokio::test]
async fn disconnect_fails_every_pending_request() {
    let (addr, server) = spawn_server(|mut socket| async move {
        for _ in 0..3 {
            read_request(&mut socket).await.unwrap();
        }
        // Hang up with all three unanswered.
    })
    .await;

    let conn = connect(addr).await;
    let handles: Vec<_> = (0..3)
        .map(|_| conn.begin_query("doomed", Consistency::One, false).unwrap())
        .collect();
    server.await.unwrap();

    for handle in handles {
        assert!(matches!(
            conn.end(handle).await,
            Err(Error::ConnectionLost)
        ));
    }
    // The connection stays dead.
    assert!(matches!(
        conn.begin_query("after close", Consistency::One, false),
        Err(Error::ConnectionLost)
    ));
}

#[tokio::test]
async fn server_error_reaches_the_caller() {
    let (addr, _server) = spawn_server(|mut socket| async move {
        let req = read_request(&mut socket).await.unwrap();
        let mut body = Vec::new();
        write_int(&mut body, 0x1100);
        write_string(&mut body, "Operation timed out");
        write_short(&mut body, Consistency::Quorum as u16);
        write_int(&mut body, 1);
        write_int(&mut body, 2);
        write_string(&mut body, "SIMPLE");
        socket
            .write_all(&response(req.stream_id, 0x00, &body))
            .await
            .unwrap();
        let _ = read_request(&mut socket).await;
    })
    .await;

    let conn = connect(addr).await;
    match conn.query("INSERT ...", Consistency::Quorum, false).await {
        Err(Error::Server(payload)) => {
            assert_eq!(payload.code, 0x1100);
            assert_eq!(payload.message, "Operation timed out");
            assert_eq!(
                payload.detail,
                Some(ErrorDetail::WriteTimeout {
                    consistency: Consistency::Quorum,
                    received: 1,
                    block_for: 2,
                    write_type: "SIMPLE".to_string(),
                })
            );
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    // A server error burns nothing: the id is free again.
    let next = conn.begin_query("again", Consistency::One, false).unwrap();
    assert_eq!(next.stream_id(), 0);
}

#[tokio::test]
async fn query_returns_materialized_rows() {
    let (addr, _server) = spawn_server(|mut socket| async move {
        let req = read_request(&mut socket).await.unwrap();
        assert_eq!(req.opcode, 0x07);
        let mut body = Vec::new();
        write_int(&mut body, 2); // rows
        write_int(&mut body, 0x0001);
        write_int(&mut body, 2);
        write_string(&mut body, "ks");
        write_string(&mut body, "t");
        write_string(&mut body, "id");
        write_short(&mut body, 0x000e); // varint
        write_string(&mut body, "name");
        write_short(&mut body, 0x000a); // text
        write_int(&mut body, 1);
        write_bytes(&mut body, Some(&[0x03, 0xe8]));
        write_bytes(&mut body, Some(b"ab"));
        socket
            .write_all(&response(req.stream_id, 0x08, &body))
            .await
            .unwrap();
        let _ = read_request(&mut socket).await;
    })
    .await;

    let conn = connect(addr).await;
    match conn
        .query("SELECT id, name FROM t", Consistency::One, false)
        .await
        .unwrap()
    {
        Output::Rows(rows) => {
            assert_eq!(rows.len(), 1);
            let row = rows.iter().next().unwrap();
            assert_eq!(
                row.get_by_name::<zero_cql::Varint>("id").unwrap(),
                zero_cql::Varint::from(1000)
            );
            assert_eq!(row.get_by_name::<&str>("name").unwrap(), "ab");
            assert!(!row.is_null(0).unwrap());
        }
        other => panic!("unexpected output {other:?}"),
    }
}

#[tokio::test]
async fn completed_stream_ids_are_reused() {
    let (addr, _server) = spawn_server(|mut socket| async move {
        while let Some(req) = read_request(&mut socket).await {
            socket
                .write_all(&response(req.stream_id, 0x08, &void_result()))
                .await
                .unwrap();
        }
    })
    .await;

    let conn = connect(addr).await;
    for _ in 0..3 {
        let handle = conn.begin_query("ping", Consistency::One, false).unwrap();
        assert_eq!(handle.stream_id(), 0);
        assert!(matches!(conn.end(handle).await.unwrap(), Output::Void));
    }
}

#[tokio::test]
async fn abandoned_handle_still_frees_its_stream_id() {
    let (addr, _server) = spawn_server(|mut socket| async move {
        while let Some(req) = read_request(&mut socket).await {
            socket
                .write_all(&response(req.stream_id, 0x08, &void_result()))
                .await
                .unwrap();
        }
    })
    .await;

    let conn = connect(addr).await;
    let abandoned = conn.begin_query("forgotten", Consistency::One, false).unwrap();
    let abandoned_id = abandoned.stream_id();
    assert_eq!(abandoned_id, 0);
    drop(abandoned);

    // The server answers in request order, so once this one completes the
    // reader has already consumed and discarded the abandoned response.
    let fence = conn.begin_query("fence", Consistency::One, false).unwrap();
    assert_eq!(fence.stream_id(), 1);
    conn.end(fence).await.unwrap();

    // Ids come back in completion order: the fence id, then the abandoned id.
    let next = conn.begin_query("next", Consistency::One, false).unwrap();
    assert_eq!(next.stream_id(), 1);
    let reclaimed = conn.begin_query("reclaimed", Consistency::One, false).unwrap();
    assert_eq!(reclaimed.stream_id(), abandoned_id);
    conn.end(next).await.unwrap();
    conn.end(reclaimed).await.unwrap();
}

#[tokio::test]
async fn concurrent_load_never_shares_a_stream_id() {
    let (addr, _server) = spawn_server(|mut socket| async move {
        while let Some(req) = read_request(&mut socket).await {
            socket
                .write_all(&response(req.stream_id, 0x08, &void_result()))
                .await
                .unwrap();
        }
    })
    .await;

    let conn = Arc::new(connect(addr).await);
    let live = Arc::new(std::sync::Mutex::new(std::collections::HashSet::new()));

    let mut workers = Vec::new();
    for task in 0u32..8 {
        let conn = Arc::clone(&conn);
        let live = Arc::clone(&live);
        workers.push(tokio::spawn(async move {
            let mut seed = (task + 1).wrapping_mul(0x9e37_79b9);
            for _ in 0..25 {
                // xorshift32 to vary how many requests each round keeps
                // in flight at once
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                let batch = 1 + (seed % 3) as usize;

                let mut handles = Vec::new();
                for _ in 0..batch {
                    let handle = conn.begin_query("ping", Consistency::One, false).unwrap();
                    let fresh = live.lock().unwrap().insert(handle.stream_id());
                    assert!(fresh, "stream id {} pending twice", handle.stream_id());
                    handles.push(handle);
                }
                // Drop the claim before waiting; the id may be reallocated
                // the moment the reader completes the job.
                while let Some(handle) = handles.pop() {
                    assert!(live.lock().unwrap().remove(&handle.stream_id()));
                    assert!(matches!(conn.end(handle).await.unwrap(), Output::Void));
                }
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }
}

#[tokio::test]
async fn prepare_then_execute() {
    let (addr, _server) = spawn_server(|mut socket| async move {
        let prepare = read_request(&mut socket).await.unwrap();
        assert_eq!(prepare.opcode, 0x09);
        let mut body = Vec::new();
        write_int(&mut body, 4); // prepared
        write_short_bytes(&mut body, &[0xca, 0xfe]);
        write_int(&mut body, 0x0001);
        write_int(&mut body, 1);
        write_string(&mut body, "ks");
        write_string(&mut body, "t");
        write_string(&mut body, "name");
        write_short(&mut body, 0x000a); // text
        socket
            .write_all(&response(prepare.stream_id, 0x08, &body))
            .await
            .unwrap();

        let execute = read_request(&mut socket).await.unwrap();
        assert_eq!(execute.opcode, 0x0a);
        let (id, rest) = read_short_bytes(&execute.body).unwrap();
        assert_eq!(id, [0xca, 0xfe]);
        let (count, rest) = read_short(rest).unwrap();
        assert_eq!(count, 1);
        let (param, rest) = read_bytes(rest).unwrap();
        assert_eq!(param, Some(&b"ab"[..]));
        let (consistency, _) = read_short(rest).unwrap();
        assert_eq!(consistency, Consistency::Quorum as u16);
        socket
            .write_all(&response(execute.stream_id, 0x08, &void_result()))
            .await
            .unwrap();
        let _ = read_request(&mut socket).await;
    })
    .await;

    let conn = connect(addr).await;
    let prepared = conn
        .prepare("INSERT INTO t (name) VALUES (?)")
        .await
        .unwrap();
    assert_eq!(prepared.id, [0xca, 0xfe]);

    // Parameter count is checked before anything hits the wire.
    assert!(matches!(
        conn.begin_execute(&prepared, &[], Consistency::Quorum, false),
        Err(Error::TypeMismatch { .. })
    ));

    let output = conn
        .execute(
            &prepared,
            &[Some(Value::Text("ab".to_string()))],
            Consistency::Quorum,
            false,
        )
        .await
        .unwrap();
    assert!(matches!(output, Output::Void));
}

#[tokio::test]
async fn credentials_answer_an_authentication_challenge() {
    let (addr, server) = spawn_raw_server(|mut socket| async move {
        let startup = read_request(&mut socket).await.unwrap();
        assert_eq!(startup.opcode, 0x01);
        let mut body = Vec::new();
        write_string(&mut body, "org.apache.cassandra.auth.PasswordAuthenticator");
        socket.write_all(&response(0, 0x03, &body)).await.unwrap();

        let creds = read_request(&mut socket).await.unwrap();
        assert_eq!(creds.opcode, 0x04);
        let (count, rest) = read_short(&creds.body).unwrap();
        assert_eq!(count, 2);
        let (key, rest) = read_string(rest).unwrap();
        let (value, rest) = read_string(rest).unwrap();
        assert_eq!((key, value), ("username", "cassandra"));
        let (key, rest) = read_string(rest).unwrap();
        let (value, _) = read_string(rest).unwrap();
        assert_eq!((key, value), ("password", "secret"));

        socket.write_all(&response(0, 0x02, &[])).await.unwrap();
        let _ = read_request(&mut socket).await;
    })
    .await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let opts = Opts {
        user: Some("cassandra".to_string()),
        password: Some("secret".to_string()),
        ..Default::default()
    };
    let conn = Conn::new_with_stream(stream, &opts, Arc::new(CodecRegistry::with_defaults()))
        .await
        .unwrap();

    drop(conn);
    server.await.unwrap();
}

#[tokio::test]
async fn authentication_failure_fails_the_connection() {
    let (addr, _server) = spawn_raw_server(|mut socket| async move {
        let _startup = read_request(&mut socket).await.unwrap();
        let mut body = Vec::new();
        write_int(&mut body, 0x0100);
        write_string(&mut body, "Bad credentials");
        socket.write_all(&response(0, 0x00, &body)).await.unwrap();
    })
    .await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let opts = Opts {
        user: Some("cassandra".to_string()),
        password: Some("wrong".to_string()),
        ..Default::default()
    };
    let outcome =
        Conn::new_with_stream(stream, &opts, Arc::new(CodecRegistry::with_defaults())).await;
    match outcome {
        Err(Error::Server(payload)) => assert_eq!(payload.code, 0x0100),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn configured_keyspace_is_selected_on_connect() {
    let (addr, _server) = spawn_server(|mut socket| async move {
        let req = read_request(&mut socket).await.unwrap();
        assert_eq!(req.opcode, 0x07);
        let (cql, _) = read_long_string(&req.body).unwrap();
        assert_eq!(cql, "USE my_keyspace");
        let mut body = Vec::new();
        write_int(&mut body, 3);
        write_string(&mut body, "my_keyspace");
        socket
            .write_all(&response(req.stream_id, 0x08, &body))
            .await
            .unwrap();
        let _ = read_request(&mut socket).await;
    })
    .await;

    let opts = Opts {
        keyspace: Some("my_keyspace".to_string()),
        ..Default::default()
    };
    let _conn = connect_with(addr, opts).await;
}

#[tokio::test]
async fn register_delivers_pushed_events() {
    let (addr, _server) = spawn_server(|mut socket| async move {
        let req = read_request(&mut socket).await.unwrap();
        assert_eq!(req.opcode, 0x0b);
        let (names, _) = read_string_list(&req.body).unwrap();
        assert_eq!(names, ["STATUS_CHANGE"]);
        socket
            .write_all(&response(req.stream_id, 0x02, &[]))
            .await
            .unwrap();

        // Server-initiated push on the reserved negative stream.
        let mut body = Vec::new();
        write_string(&mut body, "STATUS_CHANGE");
        write_string(&mut body, "DOWN");
        write_byte(&mut body, 4);
        body.extend_from_slice(&[127, 0, 0, 1]);
        write_int(&mut body, 9042);
        socket.write_all(&response(-1, 0x0c, &body)).await.unwrap();
        let _ = read_request(&mut socket).await;
    })
    .await;

    let conn = connect(addr).await;
    let mut events = conn.take_events().unwrap();
    assert!(conn.take_events().is_none());

    conn.register(&[EventType::StatusChange]).await.unwrap();

    match events.recv().await.unwrap() {
        Event::StatusChange { change, node } => {
            assert_eq!(change, "DOWN");
            assert_eq!(node.to_string(), "127.0.0.1:9042");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn options_reports_supported_versions() {
    let (addr, _server) = spawn_server(|mut socket| async move {
        let req = read_request(&mut socket).await.unwrap();
        assert_eq!(req.opcode, 0x05);
        assert!(req.body.is_empty());
        let mut body = Vec::new();
        write_short(&mut body, 1);
        write_string(&mut body, "CQL_VERSION");
        write_string_list(&mut body, &["3.0.0"]);
        socket
            .write_all(&response(req.stream_id, 0x06, &body))
            .await
            .unwrap();
        let _ = read_request(&mut socket).await;
    })
    .await;

    let conn = connect(addr).await;
    let supported = conn.options().await.unwrap();
    assert_eq!(supported["CQL_VERSION"], ["3.0.0"]);
}
