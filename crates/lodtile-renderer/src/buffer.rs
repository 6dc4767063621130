#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum BufferError {
    #[error("out of memory resizing buffer to {requested} bytes")]
    OutOfMemory { requested: u64 },
}

/// A byte buffer living in GPU memory (or anything standing in for it).
pub trait GpuBuffer {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Changes the size to `new_len` bytes, preserving the contents of the common prefix. On error the buffer is unchanged.
    fn resize(&mut self, new_len: u64) -> Result<(), BufferError>;

    /// Panics if the range is out of bounds.
    fn write(&mut self, offset: u64, data: &[u8]);

    /// Panics if the range is out of bounds.
    fn read(&self, offset: u64, out: &mut [u8]);
}

/// A [`GpuBuffer`] in host memory, with an optional size limit to emulate running out of VRAM.
#[derive(Clone, Debug, Default)]
pub struct HostBuffer {
    bytes: Vec<u8>,
    max_len: Option<u64>,
}

impl HostBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: u64) -> Self {
        Self {
            bytes: Vec::new(),
            max_len: Some(max_len),
        }
    }

    pub fn set_max_len(&mut self, max_len: Option<u64>) {
        self.max_len = max_len;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl GpuBuffer for HostBuffer {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn resize(&mut self, new_len: u64) -> Result<(), BufferError> {
        if self.max_len.map_or(false, |max| new_len > max) {
            return Err(BufferError::OutOfMemory { requested: new_len });
        }
        self.bytes.resize(new_len as usize, 0);
        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) {
        let start = offset as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }

    fn read(&self, offset: u64, out: &mut [u8]) {
        let start = offset as usize;
        out.copy_from_slice(&self.bytes[start..start + out.len()]);
    }
}

/// Owns a [`GpuBuffer`] and batches writes to it.
///
/// Uploads are only guaranteed to reach the buffer after [`flush`](Self::flush). Resizing always flushes first, so no pending
/// write can target a range that has moved or vanished.
pub struct BufferUploader<B> {
    buffer: B,
    pending: Vec<PendingWrite>,
    pending_bytes: usize,
}

struct PendingWrite {
    offset: u64,
    data: Vec<u8>,
}

impl<B: GpuBuffer> BufferUploader<B> {
    pub fn new(buffer: B) -> Self {
        Self {
            buffer,
            pending: Vec::new(),
            pending_bytes: 0,
        }
    }

    /// The underlying buffer. Pending uploads are not visible in it.
    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub fn upload(&mut self, offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.pending_bytes += data.len();
        self.pending.push(PendingWrite {
            offset,
            data: data.to_vec(),
        });
    }

    pub fn flush(&mut self) {
        for write in self.pending.drain(..) {
            self.buffer.write(write.offset, &write.data);
        }
        self.pending_bytes = 0;
    }

    pub fn resize(&mut self, new_len: u64) -> Result<(), BufferError> {
        self.flush();
        self.buffer.resize(new_len)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
