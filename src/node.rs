//! # Node
//!
//! A node owns one measurement engine inside a dedicated OS thread. The driver
//! talks to it over two bounded channels: [`Command`]s go in, and every
//! [`Command::Start`] produces exactly one result message coming out. Any other
//! input is ignored. The thread can be pinned to a CPU core so the sampler and
//! the victim workload share (or deliberately do not share) a cache domain, and
//! it is raised to maximum priority to reduce preemption noise in the timings.
//!
//! The engines themselves busy-wait on the clock; the node thread only blocks
//! while idle between commands.
use crate::calibrator::{Calibration, Calibrator};
use crate::config::{CalibratorConfig, SamplerConfig};
use crate::error::Result;
use crate::sampler::{OccupancyTrace, Sampler};
use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, error, info, warn};
use std::io;
use std::thread;
use std::time::{Duration, Instant};

/// Capacity of the command and result channels of spawned workers
const CHANNEL_CAPACITY: usize = 16;

/// Message understood by measurement nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the engine once and reply with its result
    Start,
    /// Anything else; ignored
    Other(String),
}

impl From<&str> for Command {
    fn from(msg: &str) -> Self {
        if msg.trim() == "start" {
            Command::Start
        } else {
            Command::Other(msg.to_string())
        }
    }
}

/// Common trait of a Node
pub trait Node: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Handle a single input, optionally producing an output
    fn process(&mut self, input: Self::Input) -> Option<Self::Output>;

    /// Called once when the node starts
    fn on_start(&mut self) {}

    /// Called once when the node stops
    fn on_stop(&mut self) {}
}

impl Node for Calibrator {
    type Input = Command;
    type Output = Result<Calibration>;

    fn process(&mut self, input: Command) -> Option<Self::Output> {
        match input {
            Command::Start => Some(self.run()),
            Command::Other(msg) => {
                debug!("Calibrator ignoring unrecognized command {:?}", msg);
                None
            }
        }
    }
}

impl Node for Sampler {
    type Input = Command;
    type Output = Result<OccupancyTrace>;

    fn process(&mut self, input: Command) -> Option<Self::Output> {
        match input {
            Command::Start => Some(self.run()),
            Command::Other(msg) => {
                debug!("Sampler ignoring unrecognized command {:?}", msg);
                None
            }
        }
    }
}

/// A node instance with its channels
pub struct NodeInstance<I, O> {
    /// Receiver side of channel for Node's input
    input_rx: Option<Receiver<I>>,
    /// Sender side of channel for Node's output
    output_tx: Option<Sender<O>>,
    /// Node name, used in naming OS thread
    name: String,
    /// Node to instantiate in spawned thread
    node: Box<dyn Node<Input = I, Output = O>>,
    /// Optional CPU core to pin spawned thread to
    cpu_core: Option<usize>,
}

impl<I: Send + 'static, O: Send + 'static> NodeInstance<I, O> {
    /// Create a new NodeInstance with a given name and Node
    pub fn new<N>(name: String, node: N, cpu_core: Option<usize>) -> Self
    where
        N: Node<Input = I, Output = O>,
    {
        NodeInstance {
            input_rx: None,
            output_tx: None,
            name,
            node: Box::new(node),
            cpu_core,
        }
    }

    /// Set input receiver channel
    pub fn set_receiver(&mut self, rx: Receiver<I>) {
        self.input_rx = Some(rx);
    }

    /// Set output transmitter channel
    pub fn set_sender(&mut self, tx: Sender<O>) {
        self.output_tx = Some(tx);
    }

    /// Create a bounded input channel, returning the driver's sending side
    pub fn attach_input(&mut self, capacity: usize) -> Sender<I> {
        let (tx, rx) = bounded(capacity);
        self.set_receiver(rx);
        tx
    }

    /// Create a bounded output channel, returning the driver's receiving side
    pub fn attach_output(&mut self, capacity: usize) -> Receiver<O> {
        let (tx, rx) = bounded(capacity);
        self.set_sender(tx);
        rx
    }

    /// Spawn and start new OS thread with Node logic, returning handle to thread
    ///
    /// The thread exits once its input channel is closed or its output
    /// receiver is dropped.
    pub fn spawn(mut self) -> io::Result<thread::JoinHandle<()>> {
        let Some(input_rx) = self.input_rx.take() else {
            error!("No input (RX) channel connected to node '{}', it could never be started", self.name);
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("node '{}' has no input channel", self.name),
            ));
        };
        if self.output_tx.is_none() {
            warn!(
                "No output (TX) channel connected to node '{}', results will be discarded",
                self.name
            );
        }

        thread::Builder::new().name(self.name.clone()).spawn(move || {
            if let Some(cpu_num) = self.cpu_core {
                let core_num = core_affinity::CoreId { id: cpu_num };
                if !core_affinity::set_for_current(core_num) {
                    warn!("Couldn't pin Node '{}' to CPU core {} (NOTE: this is expected on macOS)", self.name, cpu_num);
                }
            }

            if thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max).is_err() {
                warn!("Couldn't set Node '{}' to maximum thread priority", self.name);
            }

            info!("Node '{}' starting", self.name);
            self.node.on_start();

            let mut handled = 0u64;
            let mut busy = Duration::ZERO;

            // Blocking receive: the thread sleeps while idle and no measurement is running
            while let Ok(input) = input_rx.recv() {
                let proc_time = Instant::now();
                let Some(output) = self.node.process(input) else {
                    continue;
                };
                let elapsed = proc_time.elapsed();
                handled += 1;
                busy += elapsed;
                debug!("Node '{}' produced result #{} in {:?}", self.name, handled, elapsed);

                if let Some(tx) = self.output_tx.as_ref() {
                    // Err(_) == result receiver dropped, shut down
                    if tx.send(output).is_err() {
                        break;
                    }
                }
            }

            info!(
                "Node '{}' stopping after {} runs ({:?} measuring)",
                self.name, handled, busy
            );
            self.node.on_stop();
        })
    }
}

/// Driver-side handle of a spawned measurement node
pub struct Worker<T> {
    commands: Sender<Command>,
    results: Receiver<Result<T>>,
    thread: thread::JoinHandle<()>,
}

impl<T: Send + 'static> Worker<T> {
    fn spawn<N>(name: &str, node: N, cpu_core: Option<usize>) -> io::Result<Self>
    where
        N: Node<Input = Command, Output = Result<T>>,
    {
        let mut instance = NodeInstance::new(name.to_string(), node, cpu_core);
        let commands = instance.attach_input(CHANNEL_CAPACITY);
        let results = instance.attach_output(CHANNEL_CAPACITY);
        let thread = instance.spawn()?;
        Ok(Worker { commands, results, thread })
    }

    /// Deliver a command; returns `false` if the node has already stopped
    pub fn send(&self, command: impl Into<Command>) -> bool {
        self.commands.send(command.into()).is_ok()
    }

    /// Request one run
    pub fn start(&self) -> bool {
        self.send(Command::Start)
    }

    /// Wait for the next result, `None` if the node has stopped
    pub fn recv(&self) -> Option<Result<T>> {
        self.results.recv().ok()
    }

    /// Wait up to `timeout` for the next result
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        self.results.recv_timeout(timeout).ok()
    }

    /// Start one run and wait for its result
    pub fn run(&self) -> Option<Result<T>> {
        if !self.start() {
            return None;
        }
        self.recv()
    }

    /// Close the command channel and wait for the node thread to exit
    pub fn shutdown(self) -> thread::Result<()> {
        drop(self.commands);
        self.thread.join()
    }
}

/// Spawn a calibrator node, optionally pinned to `cpu_core`
pub fn spawn_calibrator(config: CalibratorConfig, cpu_core: Option<usize>) -> io::Result<Worker<Calibration>> {
    Worker::spawn("calibrator", Calibrator::new(config), cpu_core)
}

/// Spawn an occupancy sampler node, optionally pinned to `cpu_core`
pub fn spawn_sampler(config: SamplerConfig, cpu_core: Option<usize>) -> io::Result<Worker<OccupancyTrace>> {
    Worker::spawn("sampler", Sampler::new(config), cpu_core)
}
