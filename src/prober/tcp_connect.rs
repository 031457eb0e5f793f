use std::net::SocketAddr;

use tokio::net::TcpStream;
use tracing::debug;

use super::error::ProbeError;
use crate::trace::{Checkpoint, TraceRecorder};

/// Connects to the first reachable address. Every attempt overwrites
/// ConnectStart/ConnectDone, so the trace describes the attempt that won.
pub async fn connect(
    addrs: &[SocketAddr],
    recorder: &mut TraceRecorder,
) -> Result<TcpStream, ProbeError> {
    let mut last_err = None;
    for &addr in addrs {
        recorder.mark(Checkpoint::ConnectStart);
        let result = TcpStream::connect(addr).await;
        recorder.mark(Checkpoint::ConnectDone);
        match result {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(source) => {
                debug!(%addr, error = %source, "connect attempt failed");
                last_err = Some(ProbeError::Connect { addr, source });
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ProbeError::NoAddresses {
        host: "<none>".to_string(),
    }))
}
