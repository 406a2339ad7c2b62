use ca_protocol::EventEnvelope;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::MaybeTlsStream;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A test WebSocket client speaking the session envelope protocol.
pub struct MockWsClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockWsClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send_envelope(
        &mut self,
        envelope: &EventEnvelope,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(envelope)?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Send an arbitrary text frame, for malformed-envelope tests.
    pub async fn send_raw(&mut self, text: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Text(text.to_owned().into())).await?;
        Ok(())
    }

    /// Receive the next envelope, skipping transport-level ping/pong frames.
    ///
    /// Returns an error when the server closes the connection; the close
    /// frame (if any) is reported in the error message so tests can assert
    /// on close codes.
    pub async fn recv_envelope(&mut self) -> Result<EventEnvelope, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let envelope: EventEnvelope = serde_json::from_str(&text)?;
                    return Ok(envelope);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    return Err(format!("connection closed by server: {frame:?}").into())
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    /// Wait for the server to close the connection and return the close frame.
    pub async fn recv_close(
        &mut self,
    ) -> Result<Option<CloseFrame>, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Close(frame))) => return Ok(frame),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
