use std::{net::SocketAddr, time::Duration};

use log::{debug, info, warn};
use tokio::{net::TcpStream, time::sleep};

use crate::{
    config::{MAX_RETRIES, RETRY_DELAY},
    error::SearchError,
    model::Evaluator,
    protocol::{read_frame, write_frame, Command, EvalResponse, Reply},
};

/// Connect to the coordinator, retrying while it comes up.
pub async fn connect(addr: SocketAddr) -> Result<TcpStream, SearchError> {
    connect_with(addr, MAX_RETRIES, RETRY_DELAY).await
}

/// Try to connect `attempts` times, waiting `delay` after each failure.
pub async fn connect_with(addr: SocketAddr, attempts: usize, delay: Duration) -> Result<TcpStream, SearchError> {
    for attempt in 1..=attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => {
                warn!("connection attempt {attempt}/{attempts} to {addr} failed: {err}");
                sleep(delay).await;
            }
        }
    }
    Err(SearchError::ConnectFailed { addr, attempts })
}

/// Answer evaluation requests until the coordinator sends `STOP`.
pub async fn serve<E: Evaluator>(addr: SocketAddr, evaluator: E) -> Result<(), SearchError> {
    let mut stream = connect(addr).await?;
    info!("worker connected to {addr}");
    let mut evaluated = 0;
    loop {
        write_frame(&mut stream, &Reply::Ready.encode()?).await?;
        let request = match Command::decode(&read_frame(&mut stream).await?)? {
            Command::Stop => break,
            Command::Evaluate(request) => request,
        };
        request.validate()?;
        let output = evaluator.evaluate(&request)?;
        let response = EvalResponse {
            id: request.id,
            policy: output.policy,
            value: output.value,
        };
        write_frame(&mut stream, &Reply::Result(response).encode()?).await?;
        evaluated += request.size;
        debug!("evaluated request {} ({evaluated} positions so far)", request.id);
    }
    info!("worker stopping after {evaluated} positions");
    Ok(())
}
