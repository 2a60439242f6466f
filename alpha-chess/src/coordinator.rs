use std::{
    collections::HashMap,
    net::IpAddr,
    path::Path,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use serde::Serialize;
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener,
    },
    process::{self, Child},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::timeout,
};

use crate::{
    config::{PoolParams, ACCEPT_TIMEOUT, STOP_TIMEOUT},
    error::{ProtocolError, SearchError},
    model::{Evaluator, Model, ModelKind},
    protocol::{read_frame, write_frame, Command, Reply},
    repr::Position,
    search::{Batch, Tree, TreeStatus},
    worker,
};

/// Progress of a running search.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SearchStatus {
    pub elapsed_ms: u64,
    /// Positions evaluated by workers.
    pub nodes: usize,
    pub batches: usize,
    pub nps: f32,
    pub bps: f32,
    pub workers: usize,
    pub tree: TreeStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WorkerState {
    /// Connected, no `READY` seen yet.
    Starting,
    /// Waiting for work.
    Idle,
    /// Holding a batch, or about to send `READY` again.
    Busy,
    Gone,
}

struct Worker {
    writer: OwnedWriteHalf,
    state: WorkerState,
}

enum Event {
    Reply(usize, Reply),
    Lost(usize, ProtocolError),
    Malformed(usize, ProtocolError),
}

struct Progress {
    start: Instant,
    nodes: usize,
    batches: usize,
}

/// Drives tree searches with a pool of evaluation workers.
pub struct Search {
    workers: Vec<Worker>,
    events: UnboundedReceiver<Event>,
    readers: Vec<JoinHandle<()>>,
    processes: Vec<Child>,
    tasks: Vec<JoinHandle<Result<(), SearchError>>>,
    next_request: u64,
}

impl Search {
    /// Start the workers described by `pool`, each loading the model at
    /// `model_path`, and wait for all of them to connect.
    pub async fn start(pool: &PoolParams, kind: ModelKind, model_path: &Path) -> Result<Self, SearchError> {
        match &pool.worker_program {
            Some(program) => {
                let listener = TcpListener::bind((pool.host, 0)).await?;
                let addr = listener.local_addr()?;
                info!("starting {} worker processes for {addr}", pool.num_workers);
                let processes = (0..pool.num_workers)
                    .map(|_| {
                        process::Command::new(program)
                            .arg(addr.to_string())
                            .arg(model_path)
                            .arg("--kind")
                            .arg(kind.to_string())
                            .kill_on_drop(true)
                            .spawn()
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let mut search = Search::accept(listener, pool.num_workers).await?;
                search.processes = processes;
                Ok(search)
            }
            None => {
                let models = (0..pool.num_workers)
                    .map(|_| Model::load(kind, model_path))
                    .collect::<Result<Vec<_>, _>>()?;
                Search::in_process(pool.host, models).await
            }
        }
    }

    /// Serve each evaluator from a task in this process.
    pub async fn in_process<E>(host: IpAddr, evaluators: Vec<E>) -> Result<Self, SearchError>
    where
        E: Evaluator + Send + 'static,
    {
        let listener = TcpListener::bind((host, 0)).await?;
        let addr = listener.local_addr()?;
        let count = evaluators.len();
        let tasks = evaluators
            .into_iter()
            .map(|evaluator| tokio::spawn(worker::serve(addr, evaluator)))
            .collect();
        let mut search = Search::accept(listener, count).await?;
        search.tasks = tasks;
        Ok(search)
    }

    /// Accept `count` worker connections on `listener`.
    pub async fn accept(listener: TcpListener, count: usize) -> Result<Self, SearchError> {
        Search::accept_within(listener, count, ACCEPT_TIMEOUT).await
    }

    /// Like `accept`, but waits at most `limit` for each connection.
    pub async fn accept_within(listener: TcpListener, count: usize, limit: Duration) -> Result<Self, SearchError> {
        let (sender, events) = unbounded_channel();
        let mut workers = Vec::with_capacity(count);
        let mut readers = Vec::with_capacity(count);
        for id in 0..count {
            let (stream, peer) = timeout(limit, listener.accept())
                .await
                .map_err(|_| SearchError::AcceptTimeout(id))??;
            stream.set_nodelay(true)?;
            debug!("worker {id} connected from {peer}");
            let (reader, writer) = stream.into_split();
            readers.push(tokio::spawn(forward(id, reader, sender.clone())));
            workers.push(Worker {
                writer,
                state: WorkerState::Starting,
            });
        }
        Ok(Search {
            workers,
            events,
            readers,
            processes: Vec::new(),
            tasks: Vec::new(),
            next_request: 0,
        })
    }

    /// Workers that are still connected.
    pub fn live_workers(&self) -> usize {
        self.count(|state| state != WorkerState::Gone)
    }

    fn count(&self, f: impl Fn(WorkerState) -> bool) -> usize {
        self.workers.iter().filter(|worker| f(worker.state)).count()
    }

    /// Search until the root has `maxnodes` visits and every batch sent out
    /// has come back. `report` sees the progress after each expansion.
    pub async fn run<P, F>(
        &mut self,
        tree: &mut Tree<P>,
        maxnodes: u32,
        mut report: F,
    ) -> Result<SearchStatus, SearchError>
    where
        P: Position,
        F: FnMut(&SearchStatus),
    {
        let mut progress = Progress {
            start: Instant::now(),
            nodes: 0,
            batches: 0,
        };
        let mut pending: HashMap<usize, (u64, Batch<P::Action>)> = HashMap::new();

        loop {
            self.serve_idle(tree, maxnodes, &mut pending).await?;
            // Terminal leaves are backed up without producing rows, so keep
            // serving while that alone makes progress.
            while tree.root().n < maxnodes && pending.is_empty() && self.all_idle() {
                let visits = tree.root().n;
                self.serve_idle(tree, maxnodes, &mut pending).await?;
                if pending.is_empty() && tree.root().n == visits {
                    return Err(SearchError::Stalled(visits));
                }
            }
            if tree.root().n >= maxnodes && pending.is_empty() {
                break;
            }
            if self.live_workers() == 0 {
                return Err(SearchError::NoWorkers);
            }

            match self.events.recv().await.ok_or(SearchError::NoWorkers)? {
                Event::Reply(id, Reply::Ready) => {
                    if let Some((request, _)) = pending.get(&id) {
                        let message = format!("ready while holding request {request}");
                        return Err(SearchError::Malformed(id, ProtocolError::Unexpected(message)));
                    }
                    if self.workers[id].state != WorkerState::Gone {
                        self.workers[id].state = WorkerState::Idle;
                    }
                }
                Event::Reply(id, Reply::Result(response)) => {
                    let (request, batch) = pending.remove(&id).ok_or_else(|| {
                        let message = format!("unsolicited result {}", response.id);
                        SearchError::Malformed(id, ProtocolError::Unexpected(message))
                    })?;
                    if response.id != request {
                        return Err(SearchError::Malformed(
                            id,
                            ProtocolError::Unexpected(format!("result {} for request {request}", response.id)),
                        ));
                    }
                    let rows = batch.size();
                    tree.expand(batch.make_result(response.policy, response.value)?)?;
                    progress.nodes += rows;
                    progress.batches += 1;
                    report(&self.status(tree, &progress));
                }
                Event::Lost(id, err) => {
                    warn!("lost worker {id}: {err}");
                    self.workers[id].state = WorkerState::Gone;
                    if let Some((request, batch)) = pending.remove(&id) {
                        debug!("releasing {} claims of request {request}", batch.size());
                        tree.abandon(batch);
                    }
                }
                Event::Malformed(id, err) => return Err(SearchError::Malformed(id, err)),
            }
        }
        Ok(self.status(tree, &progress))
    }

    fn all_idle(&self) -> bool {
        let live = self.live_workers();
        live > 0 && self.count(|state| state == WorkerState::Idle) == live
    }

    /// Hand a fresh batch to every idle worker. Workers that get nothing stay
    /// parked until the next expansion.
    async fn serve_idle<P: Position>(
        &mut self,
        tree: &mut Tree<P>,
        maxnodes: u32,
        pending: &mut HashMap<usize, (u64, Batch<P::Action>)>,
    ) -> Result<(), SearchError> {
        let batch_size = tree.params().batch_size;
        for id in 0..self.workers.len() {
            if self.workers[id].state != WorkerState::Idle {
                continue;
            }
            if tree.root().n >= maxnodes {
                break;
            }
            let batch = tree.next_batch(batch_size)?;
            if batch.is_empty() {
                break;
            }
            let request = self.next_request;
            self.next_request += 1;
            let payload = Command::Evaluate(batch.to_request(request)).encode()?;
            match write_frame(&mut self.workers[id].writer, &payload).await {
                Ok(()) => {
                    self.workers[id].state = WorkerState::Busy;
                    pending.insert(id, (request, batch));
                }
                Err(err) => {
                    warn!("could not send request {request} to worker {id}: {err}");
                    self.workers[id].state = WorkerState::Gone;
                    tree.abandon(batch);
                }
            }
        }
        Ok(())
    }

    fn status<P: Position>(&self, tree: &Tree<P>, progress: &Progress) -> SearchStatus {
        let elapsed = progress.start.elapsed();
        let seconds = elapsed.as_secs_f32().max(f32::EPSILON);
        SearchStatus {
            elapsed_ms: elapsed.as_millis() as u64,
            nodes: progress.nodes,
            batches: progress.batches,
            nps: progress.nodes as f32 / seconds,
            bps: progress.batches as f32 / seconds,
            workers: self.live_workers(),
            tree: tree.status(),
        }
    }

    /// Tell every worker to stop and wait for them to exit.
    pub async fn stop(self) -> Result<(), SearchError> {
        self.stop_within(STOP_TIMEOUT).await
    }

    /// Like `stop`, but gives the workers only `limit` to exit.
    pub async fn stop_within(mut self, limit: Duration) -> Result<(), SearchError> {
        let stop = Command::Stop.encode()?;
        for (id, worker) in self.workers.iter_mut().enumerate() {
            if worker.state == WorkerState::Gone {
                continue;
            }
            if let Err(err) = write_frame(&mut worker.writer, &stop).await {
                debug!("worker {id} is already gone: {err}");
            }
        }

        let mut processes = std::mem::take(&mut self.processes);
        let tasks = std::mem::take(&mut self.tasks);
        let shutdown = async {
            for child in processes.iter_mut() {
                let status = child.wait().await?;
                debug!("worker process exited with {status}");
            }
            for task in tasks {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!("worker task failed: {err}"),
                    Err(err) => warn!("worker task panicked: {err}"),
                }
            }
            Ok::<(), SearchError>(())
        };
        let result = timeout(limit, shutdown).await;

        for reader in &self.readers {
            reader.abort();
        }
        match result {
            Ok(result) => result,
            Err(_) => {
                for child in processes.iter_mut() {
                    if let Err(err) = child.start_kill() {
                        debug!("could not kill worker process: {err}");
                    }
                }
                Err(SearchError::ShutdownTimeout)
            }
        }
    }
}

/// Pass frames from one worker to the search loop until the connection ends.
async fn forward(id: usize, mut reader: OwnedReadHalf, events: UnboundedSender<Event>) {
    loop {
        let event = match read_frame(&mut reader).await {
            Ok(payload) => match Reply::decode(&payload) {
                Ok(reply) => Event::Reply(id, reply),
                Err(err) => Event::Malformed(id, err),
            },
            Err(err) => Event::Lost(id, err),
        };
        let last = !matches!(event, Event::Reply(..));
        if events.send(event).is_err() || last {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use tokio::net::TcpStream;

    use super::*;

    async fn connected() -> (Search, TcpStream) {
        let listener = TcpListener::bind((IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (search, client) = tokio::join!(Search::accept(listener, 1), TcpStream::connect(addr));
        (search.unwrap(), client.unwrap())
    }

    #[tokio::test]
    async fn stop_gives_up_on_a_hung_worker() {
        let (mut search, mut client) = connected().await;
        search.tasks.push(tokio::spawn(std::future::pending()));

        let err = search.stop_within(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, SearchError::ShutdownTimeout));
        // The worker was still told to stop.
        let payload = read_frame(&mut client).await.unwrap();
        assert_eq!(Command::decode(&payload).unwrap(), Command::Stop);
    }

    #[tokio::test]
    async fn stop_waits_for_finished_tasks() {
        let (mut search, _client) = connected().await;
        search.tasks.push(tokio::spawn(async { Ok(()) }));
        search.stop_within(Duration::from_secs(1)).await.unwrap();
    }
}
