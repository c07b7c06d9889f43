//! Fixed-capacity byte ring buffer

/// Byte FIFO with a fixed capacity allocated once
#[derive(Debug, Clone)]
pub struct ByteRing {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
}

impl ByteRing {
    /// Create a new ring holding up to `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Occupied bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the ring holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free bytes
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Append bytes, returning how many fit
    pub fn put(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.free());
        let cap = self.capacity();
        let mut tail = (self.head + self.len) % cap.max(1);
        let mut written = 0;
        while written < n {
            let chunk = (n - written).min(cap - tail);
            self.buf[tail..tail + chunk].copy_from_slice(&data[written..written + chunk]);
            written += chunk;
            tail = (tail + chunk) % cap;
        }
        self.len += n;
        n
    }

    /// Copy up to `n` bytes from the front without consuming them
    pub fn peek(&self, out: &mut [u8], n: usize) -> usize {
        let n = n.min(self.len).min(out.len());
        self.copy_front(out, n);
        n
    }

    /// Remove up to `n` bytes from the front
    ///
    /// The bytes are copied into `out` when given, otherwise discarded.
    pub fn get(&mut self, out: Option<&mut [u8]>, n: usize) -> usize {
        let mut n = n.min(self.len);
        if let Some(out) = out {
            n = n.min(out.len());
            self.copy_front(out, n);
        }
        if n > 0 {
            self.head = (self.head + n) % self.capacity();
            self.len -= n;
        }
        n
    }

    /// Drop all contents
    pub fn reset(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    fn copy_front(&self, out: &mut [u8], n: usize) {
        let cap = self.capacity();
        let mut pos = self.head;
        let mut copied = 0;
        while copied < n {
            let chunk = (n - copied).min(cap - pos);
            out[copied..copied + chunk].copy_from_slice(&self.buf[pos..pos + chunk]);
            copied += chunk;
            pos = (pos + chunk) % cap;
        }
    }
}
