//! Stateless pipe helpers: one value in, one frame out, and back.

use bytes::Bytes;
use courier_codec::{decode_value_with_resources, encode_value};
use courier_core::{Credentials, FrameHeader, Port, FRAME_HEADER_SIZE};
use courier_value::Value;

use crate::Error;

/// Encode `value`, prepend a frame header carrying `sequence_id`, and hand
/// the frame plus any resources drained from the value tree to the
/// transport. If encoding fails nothing is sent.
pub async fn pipe_send(port: &Port, value: &Value, sequence_id: u64) -> Result<(), Error> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + 128);
    frame.resize(FRAME_HEADER_SIZE, 0);
    let resources = encode_value(value, &mut frame)?;

    let payload_len = (frame.len() - FRAME_HEADER_SIZE) as u64;
    let header = FrameHeader::new(sequence_id, payload_len);
    frame[..FRAME_HEADER_SIZE].copy_from_slice(&header.to_bytes());

    tracing::trace!(
        port = %port.label(),
        sequence_id,
        payload_len,
        resources = resources.len(),
        "pipe send"
    );
    port.send(&frame, resources).await?;
    Ok(())
}

/// Receive one frame, validate its header, and decode the payload with its
/// resources re-attached.
///
/// A decode failure surfaces as an error but consumes only the one frame;
/// callers keep the session open for anything short of a transport error.
pub async fn pipe_recv(port: &Port) -> Result<(Value, u64, Credentials), Error> {
    let inbound = port.recv().await?;
    let header = FrameHeader::parse(&inbound.bytes)?;

    let payload: Bytes = inbound
        .bytes
        .slice(FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + header.payload_len as usize);
    let value = decode_value_with_resources(&payload, inbound.resources)?;

    tracing::trace!(
        port = %port.label(),
        sequence_id = header.sequence_id,
        payload_len = header.payload_len,
        "pipe recv"
    );
    Ok((value, header.sequence_id, inbound.credentials))
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::mem::MemPort;

    fn ports() -> (Port, Port) {
        let (a, b) = MemPort::pair();
        (Port::Mem(a), Port::Mem(b))
    }

    #[tokio::test]
    async fn send_then_recv_roundtrips() {
        let (a, b) = ports();
        let mut dict = Value::dictionary();
        dict.dict_set_string("op", "ping").unwrap();

        pipe_send(&a, &dict, 7).await.unwrap();
        let (value, id, creds) = pipe_recv(&b).await.unwrap();

        assert_eq!(id, 7);
        assert_eq!(value, dict);
        assert!(value.is_from_wire());
        assert_eq!(creds, Credentials::current());
    }

    #[tokio::test]
    async fn bad_version_is_rejected() {
        let (a, b) = ports();
        let mut frame = FrameHeader::new(1, 0).to_bytes().to_vec();
        frame[7] = 9;
        frame.push(0xc0);
        a.send(&frame, Vec::new()).await.unwrap();

        assert!(matches!(
            pipe_recv(&b).await.unwrap_err(),
            Error::Frame(courier_core::FrameError::BadVersion(9))
        ));
    }

    #[tokio::test]
    async fn short_frame_is_rejected() {
        let (a, b) = ports();
        a.send(b"tiny", Vec::new()).await.unwrap();
        assert!(matches!(
            pipe_recv(&b).await.unwrap_err(),
            Error::Frame(courier_core::FrameError::Truncated { .. })
        ));
    }

    #[tokio::test]
    async fn garbage_payload_is_a_codec_error() {
        let (a, b) = ports();
        let mut frame = FrameHeader::new(3, 1).to_bytes().to_vec();
        frame.push(0xc1);
        a.send(&frame, Vec::new()).await.unwrap();

        assert!(matches!(
            pipe_recv(&b).await.unwrap_err(),
            Error::Codec(_)
        ));

        // The session stays usable after the bad frame.
        pipe_send(&a, &Value::int64(1), 4).await.unwrap();
        let (value, id, _) = pipe_recv(&b).await.unwrap();
        assert_eq!(id, 4);
        assert_eq!(value, Value::int64(1));
    }

    #[tokio::test]
    async fn payload_len_in_header_bounds_the_decode() {
        let (a, b) = ports();
        // Header claims 1 payload byte; two are present. The extra byte is
        // outside the declared payload and must be ignored.
        let mut frame = FrameHeader::new(5, 1).to_bytes().to_vec();
        frame.push(0x2a);
        frame.push(0xc1);
        a.send(&frame, Vec::new()).await.unwrap();

        let (value, _, _) = pipe_recv(&b).await.unwrap();
        assert_eq!(value, Value::uint64(42));
    }
}
