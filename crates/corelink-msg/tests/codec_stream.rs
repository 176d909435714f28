//! ---
//! cl_section: "02-wire-protocol"
//! cl_subsection: "module"
//! cl_type: "source"
//! cl_scope: "code"
//! cl_description: "Framing tests over in-memory duplex streams."
//! cl_version: "v0.0.0-prealpha"
//! cl_owner: "tbd"
//! ---
use corelink_msg::command::GetRuntimePath;
use corelink_msg::{CodecError, Frame, FrameReader, FrameWriter};
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn frames_cross_a_duplex_stream() {
    let (client, server) = tokio::io::duplex(1024);
    let (_client_read, client_write) = tokio::io::split(client);
    let (server_read, _server_write) = tokio::io::split(server);

    let mut writer = FrameWriter::new(client_write);
    let mut reader = FrameReader::new(server_read);

    writer.send(&Frame::Ping { seq: 1 }).await.unwrap();
    writer
        .send(&Frame::request(9, &GetRuntimePath {}).unwrap())
        .await
        .unwrap();
    writer.close().await.unwrap();

    assert_eq!(
        reader.next_frame().await.unwrap(),
        Some(Frame::Ping { seq: 1 })
    );
    match reader.next_frame().await.unwrap() {
        Some(Frame::Request { id, command, .. }) => {
            assert_eq!(id, 9);
            assert_eq!(command.as_ref(), "getRuntimePath");
        }
        other => panic!("unexpected frame {other:?}"),
    }
    assert_eq!(reader.next_frame().await.unwrap(), None);
}

#[tokio::test]
async fn malformed_lines_do_not_poison_the_stream() {
    let (mut client, server) = tokio::io::duplex(1024);
    let mut reader = FrameReader::new(server);

    client
        .write_all(b"not json\n\n{\"type\":\"pong\",\"seq\":4}\n")
        .await
        .unwrap();
    drop(client);

    let err = reader.next_frame().await.unwrap_err();
    assert!(err.is_recoverable());
    assert!(matches!(err, CodecError::Malformed { ref line, .. } if line == "not json"));
    assert_eq!(
        reader.next_frame().await.unwrap(),
        Some(Frame::Pong { seq: 4 })
    );
    assert_eq!(reader.next_frame().await.unwrap(), None);
}
