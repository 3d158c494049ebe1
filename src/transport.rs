//! One TLS connection to a receiver, framed into [`Frame`]s.

use bytes::{Buf, BufMut, BytesMut};
use crate::{
    cast::cast_channel::{self, cast_message::{PayloadType, ProtocolVersion}},
    error::{Error, Result},
    message::{Frame, FramePayload},
    util::named,
};
use protobuf::Message;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec;

/// Largest frame accepted from a receiver, excluding the length prefix.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const SIZE_OF_U32: usize = 4;

pub trait TokioAsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> TokioAsyncStream for T
where T: AsyncRead + AsyncWrite + Unpin + Send
{}

/// Length-prefixed protobuf `CastMessage` codec.
#[derive(Debug, Default)]
pub struct FrameCodec;

#[tracing::instrument(level = "info",
                      fields(ip = ?addr.ip(),
                             port = addr.port()))]
#[named]
pub async fn tls_connect(addr: SocketAddr)
-> Result<impl TokioAsyncStream>
{
    const FUNCTION_PATH: &str = function_path!();

    let ip: IpAddr = addr.ip();

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut tls_config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| Error::Other(err.into()))?
        .dangerous().with_custom_certificate_verifier(Arc::new(
            crate::util::rustls::danger::NoCertificateVerification::new_ring()))
        .with_no_client_auth();

    tls_config.enable_early_data = true;
    let tls_config = Arc::new(tls_config);

    let connector = tokio_rustls::TlsConnector::from(tls_config);

    let ip_rustls = rustls::pki_types::IpAddr::from(ip);
    let domain = rustls::pki_types::ServerName::IpAddress(ip_rustls);

    let tcp_stream = tokio::net::TcpStream::connect(addr).await?;

    tracing::debug!(target: FUNCTION_PATH,
                    "TcpStream connected");

    let tls_stream = connector.connect(domain, tcp_stream).await?;

    tracing::debug!(target: FUNCTION_PATH,
                    "TlsStream connected");

    Ok(tls_stream)
}

impl codec::Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(
        &mut self,
        frame: Frame,
        dst: &mut BytesMut
    ) -> Result<()>
    {
        let mut proto_msg = cast_channel::CastMessage::new();

        proto_msg.set_protocol_version(ProtocolVersion::CASTV2_1_0);

        proto_msg.set_namespace(frame.namespace);
        proto_msg.set_source_id(frame.source);
        proto_msg.set_destination_id(frame.destination);

        match frame.payload {
            FramePayload::String(s) => {
                proto_msg.set_payload_type(PayloadType::STRING);
                proto_msg.set_payload_utf8(s);
            },

            FramePayload::Binary(b) => {
                proto_msg.set_payload_type(PayloadType::BINARY);
                proto_msg.set_payload_binary(b);
            },
        };

        let proto_len = usize::try_from(proto_msg.compute_size())
            .map_err(|_| Error::Protocol("frame length overflow".into()))?;
        if proto_len > MAX_FRAME_LEN {
            return Err(Error::Protocol(format!(
                "outgoing frame too large: {proto_len} > {MAX_FRAME_LEN}")));
        }

        // Fits: checked against MAX_FRAME_LEN above.
        let proto_len_u32 = proto_len as u32;

        // Earlier frames may still be buffered in dst, so append.
        let start_len = dst.len();
        dst.reserve(proto_len + SIZE_OF_U32);

        // Uses big endian
        dst.put_u32(proto_len_u32);

        // Braces to limit the scope of writer.
        {
            let mut writer = dst.limit(proto_len).writer();
            proto_msg.write_to_writer(&mut writer)?;
        }

        debug_assert_eq!(dst.len() - start_len, proto_len + SIZE_OF_U32);

        Ok(())
    }
}

impl codec::Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(
        &mut self,
        src: &mut BytesMut
    ) -> Result<Option<Frame>>
    {
        if src.len() < SIZE_OF_U32 {
            return Ok(None);
        }

        let mut proto_len_bytes = [0_u8; SIZE_OF_U32];
        proto_len_bytes.copy_from_slice(&src[0..SIZE_OF_U32]);
        let proto_len = u32::from_be_bytes(proto_len_bytes) as usize;

        if proto_len > MAX_FRAME_LEN {
            return Err(Error::Protocol(format!(
                "incoming frame too large: {proto_len} > {MAX_FRAME_LEN}")));
        }

        let total_len: usize = proto_len + SIZE_OF_U32;

        let src_len = src.len();

        if src_len < total_len {
            src.reserve(total_len - src_len);
            return Ok(None);
        }

        let mut proto_msg: cast_channel::CastMessage = {
            // Braces to scope proto_bytes' borrow.
            let proto_bytes = &src[SIZE_OF_U32..total_len];
            cast_channel::CastMessage::parse_from_bytes(proto_bytes)?
        };

        src.advance(total_len);

        let frame = Frame {
            namespace: proto_msg.take_namespace(),
            source: proto_msg.take_source_id(),
            destination: proto_msg.take_destination_id(),
            payload: match proto_msg.payload_type() {
                PayloadType::STRING =>
                    FramePayload::String(proto_msg.take_payload_utf8()),
                PayloadType::BINARY =>
                    FramePayload::Binary(proto_msg.take_payload_binary()),
            },
        };

        Ok(Some(frame))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio_util::codec::{Decoder, Encoder};

    fn frame(payload: &str) -> Frame {
        Frame {
            namespace: "urn:x-cast:com.google.cast.tp.heartbeat".into(),
            source: "sender-0".into(),
            destination: "receiver-0".into(),
            payload: payload.to_string().into(),
        }
    }

    #[test]
    fn two_frames_in_one_buffer() -> Result<()> {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();

        codec.encode(frame(r#"{"type":"PING"}"#), &mut buf)?;
        codec.encode(frame(r#"{"type":"PONG"}"#), &mut buf)?;

        let prefix = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert!(buf.len() > prefix + SIZE_OF_U32);

        assert_eq!(codec.decode(&mut buf)?, Some(frame(r#"{"type":"PING"}"#)));
        assert_eq!(codec.decode(&mut buf)?, Some(frame(r#"{"type":"PONG"}"#)));
        assert_eq!(codec.decode(&mut buf)?, None);
        assert!(buf.is_empty());

        Ok(())
    }

    #[test]
    fn partial_frame_is_buffered() -> Result<()> {
        let mut codec = FrameCodec;
        let mut full = BytesMut::new();
        codec.encode(frame(r#"{"type":"PING"}"#), &mut full)?;

        let mut partial = BytesMut::new();
        partial.extend_from_slice(&full[..2]);
        assert_eq!(codec.decode(&mut partial)?, None);

        partial.extend_from_slice(&full[2..full.len() - 1]);
        assert_eq!(codec.decode(&mut partial)?, None);

        partial.extend_from_slice(&full[full.len() - 1..]);
        assert_eq!(codec.decode(&mut partial)?, Some(frame(r#"{"type":"PING"}"#)));

        Ok(())
    }

    #[test]
    fn oversize_frame_rejected() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LEN + 1) as u32);
        buf.put_bytes(0, 16);

        assert!(matches!(codec.decode(&mut buf), Err(Error::Protocol(_))));
    }
}
