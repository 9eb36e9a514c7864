//! WGSL sources for the three compute pipelines.
//!
//! Workgroup size is a compile-time constant in WGSL, so sources are
//! generated per accelerator configuration. All pipelines share the same
//! 16-byte params uniform: `dims`, `count`, and two reserved words.
//! Thresholding matches the CPU kernels: `>= 0` maps to +1.

/// Pipeline identity (also the pipeline map key).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Similarity,
    Convolution,
    Bundle,
}

impl PipelineKind {
    pub fn all() -> [PipelineKind; 3] {
        [
            PipelineKind::Similarity,
            PipelineKind::Convolution,
            PipelineKind::Bundle,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            PipelineKind::Similarity => "holomem-similarity",
            PipelineKind::Convolution => "holomem-convolution",
            PipelineKind::Bundle => "holomem-bundle",
        }
    }

    /// WGSL source for this pipeline.
    pub fn source(&self, workgroup_size: u32) -> String {
        match self {
            PipelineKind::Similarity => similarity_source(workgroup_size),
            PipelineKind::Convolution => convolution_source(workgroup_size),
            PipelineKind::Bundle => bundle_source(workgroup_size),
        }
    }
}

const PARAMS_STRUCT: &str = r#"
struct Params {
    dims: u32,
    count: u32,
    reserved0: u32,
    reserved1: u32,
}
"#;

/// One invocation per stored vector: normalized dot product against the query.
pub fn similarity_source(workgroup_size: u32) -> String {
    format!(
        r#"{PARAMS_STRUCT}
@group(0) @binding(0) var<storage, read> query: array<f32>;
@group(0) @binding(1) var<storage, read> vectors: array<f32>;
@group(0) @binding(2) var<storage, read_write> results: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size({workgroup_size})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let idx = gid.x;
    if (idx >= params.count) {{
        return;
    }}
    let base = idx * params.dims;
    var acc: f32 = 0.0;
    for (var i: u32 = 0u; i < params.dims; i = i + 1u) {{
        acc = acc + query[i] * vectors[base + i];
    }}
    let n = f32(params.dims);
    results[idx] = (acc + n) / (2.0 * n);
}}
"#
    )
}

/// One invocation per output index: `sign(Σ_k a[k] · b[(i - k) mod n])`.
pub fn convolution_source(workgroup_size: u32) -> String {
    format!(
        r#"{PARAMS_STRUCT}
@group(0) @binding(0) var<storage, read> lhs: array<f32>;
@group(0) @binding(1) var<storage, read> rhs: array<f32>;
@group(0) @binding(2) var<storage, read_write> result_vec: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size({workgroup_size})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let i = gid.x;
    let n = params.dims;
    if (i >= n) {{
        return;
    }}
    var acc: f32 = 0.0;
    for (var k: u32 = 0u; k < n; k = k + 1u) {{
        let j = (i + n - k) % n;
        acc = acc + lhs[k] * rhs[j];
    }}
    result_vec[i] = select(-1.0, 1.0, acc >= 0.0);
}}
"#
    )
}

/// One invocation per component: majority vote across `count` vectors.
pub fn bundle_source(workgroup_size: u32) -> String {
    format!(
        r#"{PARAMS_STRUCT}
@group(0) @binding(0) var<storage, read> vectors: array<f32>;
@group(0) @binding(1) var<storage, read_write> result_vec: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size({workgroup_size})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let i = gid.x;
    if (i >= params.dims) {{
        return;
    }}
    var acc: f32 = 0.0;
    for (var j: u32 = 0u; j < params.count; j = j + 1u) {{
        acc = acc + vectors[j * params.dims + i];
    }}
    result_vec[i] = select(-1.0, 1.0, acc >= 0.0);
}}
"#
    )
}

/// Workgroups needed to cover `items` invocations.
pub fn workgroup_count(items: usize, workgroup_size: u32) -> u32 {
    let wg = workgroup_size.max(1) as usize;
    items.div_ceil(wg) as u32
}
