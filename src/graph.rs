//! The per-block audio processing graph: typed nodes, explicit edges with
//! back-edge rejection, a precomputed topological order, and two executors —
//! a serial walk and an optional fixed worker pool draining a ready queue.

pub mod node;

pub use node::{Meters, Node, NodeId, NodeKind, PortKind, ProcessCtx};

use crossbeam::queue::ArrayQueue;
use crossbeam::utils::Backoff;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    /// The connection would close a cycle; audio graphs are DAGs by
    /// construction.
    WouldCycle,
    UnknownNode,
    /// The graph has no Master node to read output from.
    NoMaster,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GraphError::WouldCycle => write!(f, "connection would create a cycle"),
            GraphError::UnknownNode => write!(f, "connection references an unknown node"),
            GraphError::NoMaster => write!(f, "graph has no master node"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Assembles a [`Graph`]. All allocation happens here, on the UI thread;
/// the built graph never grows.
pub struct GraphBuilder {
    nodes: Vec<Node>,
    succs: Vec<Vec<usize>>,
    max_frames: usize,
}

impl GraphBuilder {
    pub fn new(max_frames: usize) -> Self {
        Self {
            nodes: Vec::new(),
            succs: Vec::new(),
            max_frames,
        }
    }

    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node::new(kind, self.max_frames));
        self.succs.push(Vec::new());
        NodeId(self.nodes.len() - 1)
    }

    /// Connect `src` → `dst` on the given port. Rejects self-edges and any
    /// edge that would close a cycle.
    pub fn connect(&mut self, src: NodeId, dst: NodeId, port: PortKind) -> Result<(), GraphError> {
        if src.0 >= self.nodes.len() || dst.0 >= self.nodes.len() {
            return Err(GraphError::UnknownNode);
        }
        if src.0 == dst.0 || self.reaches(dst.0, src.0) {
            return Err(GraphError::WouldCycle);
        }

        match port {
            PortKind::Audio => self.nodes[dst.0].audio_in.push(src),
            PortKind::Events => self.nodes[dst.0].event_in.push(src),
        }
        self.succs[src.0].push(dst.0);
        Ok(())
    }

    /// Depth-first reachability over the existing edges.
    fn reaches(&self, from: usize, to: usize) -> bool {
        if from == to {
            return true;
        }
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if !visited[n] {
                visited[n] = true;
                stack.extend(self.succs[n].iter().copied());
            }
        }
        false
    }

    /// Finish the graph. `num_workers` of 0 selects the serial executor.
    pub fn build(self, num_workers: usize) -> Result<Graph, GraphError> {
        let count = self.nodes.len();

        let mut indegree = vec![0u32; count];
        for succs in &self.succs {
            for &s in succs {
                indegree[s] += 1;
            }
        }

        // Kahn's algorithm; the connect-time cycle check guarantees it
        // consumes every node
        let mut topo = Vec::with_capacity(count);
        let mut heads: Vec<usize> = (0..count).filter(|&n| indegree[n] == 0).collect();
        let mut remaining = indegree.clone();
        while let Some(n) = heads.pop() {
            topo.push(n);
            for &s in &self.succs[n] {
                remaining[s] -= 1;
                if remaining[s] == 0 {
                    heads.push(s);
                }
            }
        }
        deck_debug_assert_eq!(topo.len(), count);

        let master = self
            .nodes
            .iter()
            .position(|n| matches!(n.kind, NodeKind::Master { .. }));
        if master.is_none() && count > 0 {
            return Err(GraphError::NoMaster);
        }

        let core = Arc::new(GraphCore {
            nodes: self.nodes.into_iter().map(UnsafeCell::new).collect(),
            topo,
            succs: self.succs,
            indegree,
            pending: (0..count).map(|_| AtomicU32::new(0)).collect(),
            ready: ArrayQueue::new(count.max(1)),
            remaining: AtomicUsize::new(0),
            ctx: AtomicPtr::new(std::ptr::null_mut()),
            shutdown: AtomicBool::new(false),
        });

        let workers = (0..num_workers)
            .map(|n| {
                let core = core.clone();
                std::thread::Builder::new()
                    .name(format!("graph-worker-{n}"))
                    .spawn(move || worker_main(&core))
                    .expect("failed to spawn graph worker")
            })
            .collect();

        Ok(Graph {
            core,
            workers,
            master,
        })
    }
}

/// State shared between the audio thread and the graph workers.
struct GraphCore {
    nodes: Vec<UnsafeCell<Node>>,
    topo: Vec<usize>,
    succs: Vec<Vec<usize>>,
    indegree: Vec<u32>,
    /// Unsatisfied dependencies per node, reset each block.
    pending: Vec<AtomicU32>,
    /// Nodes whose dependencies are satisfied, waiting for a worker.
    ready: ArrayQueue<usize>,
    /// Nodes not yet completed this block; the block is done at zero.
    remaining: AtomicUsize,
    /// The block's `ProcessCtx`, published for the workers' duration of the
    /// block and null otherwise. Type-erased because the context borrows the
    /// audio thread's stack.
    ctx: AtomicPtr<()>,
    shutdown: AtomicBool,
}

// SAFETY: nodes are only mutated by whichever thread pops them from the ready
// queue (or by the serial walk); the dependency counts guarantee exclusive
// access per node per block, and buffers of completed nodes are only read.
unsafe impl Sync for GraphCore {}
unsafe impl Send for GraphCore {}

fn worker_main(core: &GraphCore) {
    let backoff = Backoff::new();
    loop {
        if core.shutdown.load(Ordering::Acquire) {
            break;
        }
        match core.ready.pop() {
            Some(index) => {
                backoff.reset();
                run_node(core, index);
            }
            None => {
                if core.remaining.load(Ordering::Acquire) > 0 {
                    std::hint::spin_loop();
                } else {
                    backoff.snooze();
                }
            }
        }
    }
}

fn run_node(core: &GraphCore, index: usize) {
    let ctx = core.ctx.load(Ordering::Acquire) as *const ProcessCtx;
    deck_debug_assert!(!ctx.is_null());
    // SAFETY: the context pointer is published before any node becomes ready
    // and cleared only after `remaining` hits zero, and the ready queue hands
    // each node to exactly one thread.
    unsafe {
        let node = &mut *core.nodes[index].get();
        node.process(&*ctx, &core.nodes);
    }

    for &succ in &core.succs[index] {
        if core.pending[succ].fetch_sub(1, Ordering::AcqRel) == 1 {
            let pushed = core.ready.push(succ).is_ok();
            deck_debug_assert!(pushed, "Graph ready queue overflow");
        }
    }
    core.remaining.fetch_sub(1, Ordering::AcqRel);
}

/// The built graph. `process` runs on the audio thread; construction,
/// rebuilds, and drops happen on the UI thread.
pub struct Graph {
    core: Arc<GraphCore>,
    workers: Vec<JoinHandle<()>>,
    master: Option<usize>,
}

impl Graph {
    /// Evaluate every node for one block. With workers the audio thread
    /// co-drains the ready queue and spins (bounded by the DAG depth) until
    /// the last node completes; workers never outlive the block.
    pub fn process(&self, ctx: &ProcessCtx) {
        let core = &self.core;
        let count = core.nodes.len();
        if count == 0 {
            return;
        }

        if self.workers.is_empty() {
            // Serial: walk the precomputed order
            for &index in &core.topo {
                // SAFETY: single-threaded walk in dependency order.
                unsafe {
                    let node = &mut *core.nodes[index].get();
                    node.process(ctx, &core.nodes);
                }
            }
            return;
        }

        for (pending, &indegree) in core.pending.iter().zip(&core.indegree) {
            pending.store(indegree, Ordering::Relaxed);
        }
        core.remaining.store(count, Ordering::Release);
        core.ctx
            .store(ctx as *const ProcessCtx as *mut (), Ordering::Release);

        for (index, &indegree) in core.indegree.iter().enumerate() {
            if indegree == 0 {
                let pushed = core.ready.push(index).is_ok();
                deck_debug_assert!(pushed, "Graph ready queue overflow");
            }
        }

        // Co-drain until the block is done
        while core.remaining.load(Ordering::Acquire) > 0 {
            match core.ready.pop() {
                Some(index) => run_node(core, index),
                None => std::hint::spin_loop(),
            }
        }

        core.ctx.store(std::ptr::null_mut(), Ordering::Release);
    }

    /// The master node's stereo output for the block that just ran.
    pub fn master_output(&self) -> (&[f32], &[f32]) {
        match self.master {
            // SAFETY: called by the audio thread after `process` returned;
            // no node is running.
            Some(index) => unsafe {
                let node = &*self.core.nodes[index].get();
                (&node.out_audio[0], &node.out_audio[1])
            },
            None => (&[], &[]),
        }
    }

    pub fn node_count(&self) -> usize {
        self.core.nodes.len()
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.core.shutdown.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventList;
    use crate::processor::slot::{PluginSlot, SlotInstance};
    use crate::processor::test_support::DcInstrument;
    use crate::processor::Processor;
    use crate::session::launcher::TrackPlayback;
    use crate::session::snapshot::{RtGate, Snapshot, TestClock};
    use crate::session::ClipState;

    fn loaded_slot(level: f32) -> Arc<PluginSlot> {
        let gate = RtGate::new();
        let slot = Arc::new(PluginSlot::new());
        let mut processor = Box::new(DcInstrument::new(level));
        assert!(processor.init(48_000.0, 64));
        processor.activate();
        slot.install(Box::new(SlotInstance::new(processor)), &gate, &TestClock);
        slot
    }

    struct CtxStorage {
        snapshot: Box<Snapshot>,
        playback: Vec<TrackPlayback>,
        live: Vec<EventList>,
        silence: Vec<f32>,
    }

    impl CtxStorage {
        fn new(frames: usize) -> Self {
            let mut snapshot = Box::new(Snapshot::new(1, 1));
            // One playing clip with a note spanning the block
            let clip = snapshot.clip_mut(0, 0);
            clip.state = ClipState::Playing;
            clip.length_beats = 4.0;
            clip.add_note(crate::session::NoteSnap {
                key: 60,
                velocity: 1.0,
                release: 0.5,
                start_beat: 0.0,
                duration_beats: 4.0,
            });

            Self {
                snapshot,
                playback: vec![TrackPlayback {
                    scene: 0,
                    changed: false,
                    change_offset: 0,
                    local_from: 0.0,
                    local_to: 0.1,
                    length_beats: 4.0,
                    recording: false,
                }],
                live: vec![EventList::with_capacity(16)],
                silence: vec![0.0; frames],
            }
        }

        fn ctx(&self) -> ProcessCtx<'_> {
            ProcessCtx {
                snapshot: &self.snapshot,
                playback: &self.playback,
                live_events: &self.live,
                fresh_notes: &[],
                frames: self.silence.len(),
                steady_time: 0,
                sample_rate: 48_000.0,
                samples_per_beat: 24_000.0,
                silence: &self.silence,
            }
        }
    }

    fn session_graph(workers: usize, level: f32) -> Graph {
        let meters = Arc::new(Meters::new());
        let mut builder = GraphBuilder::new(64);
        let ns = builder.add_node(NodeKind::note_source(0));
        let synth = builder.add_node(NodeKind::Synth {
            track: 0,
            slot: loaded_slot(level),
        });
        let gain = builder.add_node(NodeKind::Gain {
            track: 0,
            current_gain: 1.0,
            meters: meters.clone(),
        });
        let mixer = builder.add_node(NodeKind::Mixer);
        let master = builder.add_node(NodeKind::Master { meters });

        builder.connect(ns, synth, PortKind::Events).unwrap();
        builder.connect(synth, gain, PortKind::Audio).unwrap();
        builder.connect(gain, mixer, PortKind::Audio).unwrap();
        builder.connect(mixer, master, PortKind::Audio).unwrap();
        builder.build(workers).unwrap()
    }

    #[test]
    fn rejects_back_edges() {
        let mut builder = GraphBuilder::new(64);
        let a = builder.add_node(NodeKind::Mixer);
        let b = builder.add_node(NodeKind::Mixer);
        let c = builder.add_node(NodeKind::Master {
            meters: Arc::new(Meters::new()),
        });
        builder.connect(a, b, PortKind::Audio).unwrap();
        builder.connect(b, c, PortKind::Audio).unwrap();
        assert_eq!(builder.connect(c, a, PortKind::Audio), Err(GraphError::WouldCycle));
        assert_eq!(builder.connect(a, a, PortKind::Audio), Err(GraphError::WouldCycle));
    }

    #[test]
    fn serial_execution_reaches_the_master() {
        let graph = session_graph(0, 0.25);
        let storage = CtxStorage::new(64);

        graph.process(&storage.ctx());
        let (left, right) = graph.master_output();
        // The note-on lands at offset 0, so the whole block carries DC
        assert_eq!(left[0], 0.25);
        assert_eq!(right[63], 0.25);
    }

    #[test]
    fn parallel_execution_matches_serial() {
        let serial = session_graph(0, 0.5);
        let parallel = session_graph(2, 0.5);
        let storage = CtxStorage::new(64);

        serial.process(&storage.ctx());
        parallel.process(&storage.ctx());

        let (serial_left, _) = serial.master_output();
        let (parallel_left, _) = parallel.master_output();
        assert_eq!(serial_left, parallel_left);
    }

    #[test]
    fn graph_without_master_is_rejected() {
        let mut builder = GraphBuilder::new(64);
        builder.add_node(NodeKind::Mixer);
        assert!(matches!(builder.build(0), Err(GraphError::NoMaster)));
    }
}
