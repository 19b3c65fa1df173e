//! GPU-accelerated channel-name search using Metal.

use std::thread;
use std::time::{Duration, Instant};

use metal::{
    Buffer, CommandQueue, ComputePipelineState, Device, MTLResourceOptions, MTLSize,
};

use crate::executor::{BatchParams, MAX_BATCH_MATCHES};

/// GPU command timeout (10 seconds should be plenty for any batch)
const GPU_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval when waiting for GPU completion
const GPU_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Metal shader source - embedded at compile time
const SHADER_SOURCE: &str = include_str!("channel.metal");

/// Candidates screened by one kernel thread. Must match the shader.
pub const CANDIDATES_PER_THREAD: u64 = 32;

/// Largest ciphertext the uniform buffer accepts.
const MAX_CIPHERTEXT_LEN: usize = 512;

/// Dispatch sizing for the device at hand.
#[derive(Clone)]
struct GpuTier {
    threads_per_dispatch: usize,
    threadgroup_size: usize,
}

impl GpuTier {
    /// Pick a thread count from the device family and its recommended
    /// working-set size (Ultra / Max / Pro / base M-series, in that order).
    fn detect(device: &Device) -> Self {
        let name = device.name().to_string();
        let family = name.to_lowercase();
        let mem_mb = device.recommended_max_working_set_size() / (1024 * 1024);
        let apple_silicon = family.contains("apple");

        let threads_per_dispatch = if family.contains("ultra") || mem_mb >= 80_000 {
            262_144
        } else if family.contains("max") || mem_mb >= 40_000 {
            131_072
        } else if family.contains("pro") || (apple_silicon && mem_mb >= 18_000) {
            65_536
        } else if apple_silicon && mem_mb >= 8_000 {
            49_152
        } else {
            32_768
        };

        println!(
            "[gpu] {} ({} MB working set): {} threads per dispatch",
            name, mem_mb, threads_per_dispatch
        );

        Self {
            threads_per_dispatch,
            threadgroup_size: 256,
        }
    }
}

/// Uniform buffer layout. Must match `SearchParams` in the shader.
#[repr(C)]
#[derive(Clone, Copy)]
struct RawParams {
    length: u32,
    target_hash: u32,
    offset_lo: u32,
    offset_hi: u32,
    batch_size: u32,
    ct_len: u32,
    mac: u32,
    _pad: u32,
}

/// Metal-backed batch executor.
///
/// Candidates are generated on-GPU from the enumeration index, so the only
/// per-dispatch traffic is the parameter block and the match read-back.
pub struct GpuSearch {
    /// Metal device (kept alive for buffer/pipeline lifetime)
    #[allow(dead_code)]
    device: Device,
    pipeline: ComputePipelineState,
    queue: CommandQueue,
    tier: GpuTier,

    params_buffer: Buffer,
    ct_buffer: Buffer,
    count_buffer: Buffer,
    match_buffer: Buffer,
}

// Metal types are thread-safe on Apple Silicon
unsafe impl Send for GpuSearch {}
unsafe impl Sync for GpuSearch {}

impl GpuSearch {
    pub fn new() -> Result<Self, String> {
        let device = Device::system_default().ok_or("No Metal device found")?;

        let tier = GpuTier::detect(&device);

        let library = device
            .new_library_with_source(SHADER_SOURCE, &metal::CompileOptions::new())
            .map_err(|e| format!("Failed to compile shader: {}", e))?;

        let function = library
            .get_function("search_channel_names", None)
            .map_err(|e| format!("Failed to get kernel function: {}", e))?;

        let pipeline = device
            .new_compute_pipeline_state_with_function(&function)
            .map_err(|e| format!("Failed to create pipeline: {}", e))?;

        let queue = device.new_command_queue();
        let storage = MTLResourceOptions::StorageModeShared;

        let params_buffer = device.new_buffer(std::mem::size_of::<RawParams>() as u64, storage);
        let ct_buffer = device.new_buffer(MAX_CIPHERTEXT_LEN as u64, storage);
        let count_buffer = device.new_buffer(4, storage);
        let match_buffer = device.new_buffer((MAX_BATCH_MATCHES * 4) as u64, storage);

        Ok(Self {
            device,
            pipeline,
            queue,
            tier,
            params_buffer,
            ct_buffer,
            count_buffer,
            match_buffer,
        })
    }

    /// Auto-tuner starting batch size for this device.
    pub fn initial_batch_size(&self) -> u64 {
        self.tier.threads_per_dispatch as u64 * CANDIDATES_PER_THREAD
    }

    /// Dispatch one batch and read back the matching indices, ascending.
    pub fn search(&self, p: &BatchParams) -> Result<Vec<u32>, String> {
        let ct = p.ciphertext.unwrap_or(&[]);
        if ct.len() > MAX_CIPHERTEXT_LEN {
            return Err(format!(
                "Ciphertext of {} bytes exceeds the {} byte buffer",
                ct.len(),
                MAX_CIPHERTEXT_LEN
            ));
        }

        let mac = p
            .cipher_mac
            .map(|m| u32::from(m[0]) << 8 | u32::from(m[1]))
            .unwrap_or(0);

        let raw = RawParams {
            length: p.length,
            target_hash: p.target_hash as u32,
            offset_lo: p.offset as u32,
            offset_hi: (p.offset >> 32) as u32,
            batch_size: p.batch_size,
            ct_len: if p.cipher_mac.is_some() { ct.len() as u32 } else { 0 },
            mac,
            _pad: 0,
        };

        unsafe {
            *(self.params_buffer.contents() as *mut RawParams) = raw;
            std::ptr::copy_nonoverlapping(
                ct.as_ptr(),
                self.ct_buffer.contents() as *mut u8,
                ct.len(),
            );
            *(self.count_buffer.contents() as *mut u32) = 0;
        }

        let command_buffer = self.queue.new_command_buffer();
        let encoder = command_buffer.new_compute_command_encoder();

        encoder.set_compute_pipeline_state(&self.pipeline);
        encoder.set_buffer(0, Some(&self.params_buffer), 0);
        encoder.set_buffer(1, Some(&self.ct_buffer), 0);
        encoder.set_buffer(2, Some(&self.count_buffer), 0);
        encoder.set_buffer(3, Some(&self.match_buffer), 0);

        let threads = (p.batch_size as u64 + CANDIDATES_PER_THREAD - 1) / CANDIDATES_PER_THREAD;
        let grid_size = MTLSize::new(threads, 1, 1);
        let threadgroup_size = MTLSize::new(self.tier.threadgroup_size as u64, 1, 1);

        encoder.dispatch_threads(grid_size, threadgroup_size);
        encoder.end_encoding();

        command_buffer.commit();

        // Wait with timeout to prevent infinite blocking
        let deadline = Instant::now() + GPU_TIMEOUT;
        loop {
            match command_buffer.status() {
                metal::MTLCommandBufferStatus::Completed => break,
                metal::MTLCommandBufferStatus::Error => {
                    return Err("GPU command buffer failed".to_string());
                }
                _ => {
                    if Instant::now() > deadline {
                        return Err(format!("GPU timeout after {:?}", GPU_TIMEOUT));
                    }
                    thread::sleep(GPU_POLL_INTERVAL);
                }
            }
        }

        let mut matches = unsafe {
            let count = (*(self.count_buffer.contents() as *const u32)) as usize;
            let found = count.min(MAX_BATCH_MATCHES);
            let ptr = self.match_buffer.contents() as *const u32;
            std::slice::from_raw_parts(ptr, found).to_vec()
        };

        // Append order is nondeterministic; callers expect enumeration order.
        matches.sort_unstable();
        Ok(matches)
    }
}
