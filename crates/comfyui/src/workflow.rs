//! Job graph model and the fixed SeedVR2 upscale workflow.
//!
//! A [`JobGraph`] maps node ids to typed [`NodeSpec`]s and serializes to
//! the prompt format accepted by ComfyUI's `/prompt` endpoint, where each
//! link is encoded inline as `[source_node_id, output_slot]`.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;

use serde_json::{json, Map, Value};
use upscale_core::random::RandomSource;

// ---------------------------------------------------------------------------
// Fixed topology
// ---------------------------------------------------------------------------

pub const SAVE_NODE_ID: &str = "10";
pub const UPSCALE_NODE_ID: &str = "11";
pub const DIT_NODE_ID: &str = "12";
pub const VAE_NODE_ID: &str = "13";
pub const LOAD_NODE_ID: &str = "16";

/// Prefix for files written by the save node.
pub const OUTPUT_FILENAME_PREFIX: &str = "upscale";

const DIT_MODEL: &str = "seedvr2_ema_7b_sharp_fp16.safetensors";
const VAE_MODEL: &str = "ema_vae_fp16.safetensors";
const COMPUTE_DEVICE: &str = "cuda:0";
const OFFLOAD_DEVICE: &str = "cpu";
const DIT_BLOCKS_TO_SWAP: u32 = 36;
const VAE_TILE_SIZE: u32 = 1024;
const VAE_TILE_OVERLAP: u32 = 128;

// ---------------------------------------------------------------------------
// Graph model
// ---------------------------------------------------------------------------

/// Node operation types used by the upscale workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    LoadImage,
    LoadDiTModel,
    LoadVaeModel,
    Upscale,
    SaveImage,
}

impl NodeType {
    /// ComfyUI `class_type` for this operation.
    pub fn class_type(self) -> &'static str {
        match self {
            Self::LoadImage => "LoadImage",
            Self::LoadDiTModel => "SeedVR2LoadDiTModel",
            Self::LoadVaeModel => "SeedVR2LoadVAEModel",
            Self::Upscale => "SeedVR2VideoUpscaler",
            Self::SaveImage => "SaveImage",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::LoadImage => "Load Image",
            Self::LoadDiTModel => "Load DiT Model",
            Self::LoadVaeModel => "Load VAE Model",
            Self::Upscale => "Upscale",
            Self::SaveImage => "Save Image",
        }
    }
}

/// An input wired to another node's output slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLink {
    pub input: String,
    pub source: String,
    pub slot: u32,
}

/// One processing node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub node_type: NodeType,
    pub parameters: Map<String, Value>,
    /// Ordered input references.
    pub links: Vec<NodeLink>,
}

impl NodeSpec {
    fn new(node_type: NodeType, parameters: Value) -> Self {
        let parameters = match parameters {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            node_type,
            parameters,
            links: Vec::new(),
        }
    }

    fn link(mut self, input: &str, source: &str, slot: u32) -> Self {
        self.links.push(NodeLink {
            input: input.to_string(),
            source: source.to_string(),
            slot,
        });
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }
}

/// Structural problems found by [`JobGraph::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("node {node} input {input} references missing node {source_node}")]
    DanglingLink {
        node: String,
        input: String,
        source_node: String,
    },

    #[error("graph contains a cycle through node {0}")]
    Cycle(String),
}

/// Immutable node-id to node mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct JobGraph {
    nodes: BTreeMap<String, NodeSpec>,
}

impl JobGraph {
    pub fn new(nodes: BTreeMap<String, NodeSpec>) -> Self {
        Self { nodes }
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    /// Check that every link resolves inside the graph and that the graph
    /// is acyclic.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (id, spec) in &self.nodes {
            for link in &spec.links {
                if !self.nodes.contains_key(&link.source) {
                    return Err(GraphError::DanglingLink {
                        node: id.clone(),
                        input: link.input.clone(),
                        source_node: link.source.clone(),
                    });
                }
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            graph: &'a BTreeMap<String, NodeSpec>,
            id: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<(), GraphError> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(GraphError::Cycle(id.to_string())),
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(spec) = graph.get(id) {
                for link in &spec.links {
                    visit(graph, &link.source, marks)?;
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for id in self.nodes.keys() {
            visit(&self.nodes, id, &mut marks)?;
        }
        Ok(())
    }

    /// Serialize into the `/prompt` workflow document.
    pub fn to_prompt(&self) -> Value {
        let nodes = self
            .nodes
            .iter()
            .map(|(id, spec)| {
                let mut inputs = spec.parameters.clone();
                for link in &spec.links {
                    inputs.insert(link.input.clone(), json!([link.source, link.slot]));
                }
                let node = json!({
                    "inputs": inputs,
                    "class_type": spec.node_type.class_type(),
                    "_meta": { "title": spec.node_type.title() },
                });
                (id.clone(), node)
            })
            .collect::<Map<_, _>>();

        Value::Object(nodes)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Build the upscale workflow for a stored image.
///
/// `resolution` drives both the target and maximum resolution of the
/// upscaler. A fresh seed is drawn from `random` on every call.
pub fn build_upscale_graph(
    image_name: &str,
    resolution: NonZeroU32,
    random: &dyn RandomSource,
) -> JobGraph {
    let resolution = resolution.get();
    let mut nodes = BTreeMap::new();

    nodes.insert(
        LOAD_NODE_ID.to_string(),
        NodeSpec::new(NodeType::LoadImage, json!({ "image": image_name })),
    );

    nodes.insert(
        DIT_NODE_ID.to_string(),
        NodeSpec::new(
            NodeType::LoadDiTModel,
            json!({
                "model": DIT_MODEL,
                "device": COMPUTE_DEVICE,
                "blocks_to_swap": DIT_BLOCKS_TO_SWAP,
                "swap_io_components": false,
                "offload_device": OFFLOAD_DEVICE,
                "cache_model": false,
                "attention_mode": "sdpa",
            }),
        ),
    );

    nodes.insert(
        VAE_NODE_ID.to_string(),
        NodeSpec::new(
            NodeType::LoadVaeModel,
            json!({
                "model": VAE_MODEL,
                "device": COMPUTE_DEVICE,
                "encode_tiled": true,
                "encode_tile_size": VAE_TILE_SIZE,
                "encode_tile_overlap": VAE_TILE_OVERLAP,
                "decode_tiled": true,
                "decode_tile_size": VAE_TILE_SIZE,
                "decode_tile_overlap": VAE_TILE_OVERLAP,
                "tile_debug": "false",
                "offload_device": OFFLOAD_DEVICE,
                "cache_model": false,
            }),
        ),
    );

    nodes.insert(
        UPSCALE_NODE_ID.to_string(),
        NodeSpec::new(
            NodeType::Upscale,
            json!({
                "seed": random.seed(),
                "resolution": resolution,
                "max_resolution": resolution,
                "batch_size": 1,
                "uniform_batch_size": false,
                "color_correction": "lab",
                "temporal_overlap": 0,
                "prepend_frames": 0,
                "input_noise_scale": 0,
                "latent_noise_scale": 0,
                "offload_device": OFFLOAD_DEVICE,
                "enable_debug": false,
            }),
        )
        .link("image", LOAD_NODE_ID, 0)
        .link("dit", DIT_NODE_ID, 0)
        .link("vae", VAE_NODE_ID, 0),
    );

    nodes.insert(
        SAVE_NODE_ID.to_string(),
        NodeSpec::new(
            NodeType::SaveImage,
            json!({ "filename_prefix": OUTPUT_FILENAME_PREFIX }),
        )
        .link("images", UPSCALE_NODE_ID, 0),
    );

    JobGraph::new(nodes)
}
