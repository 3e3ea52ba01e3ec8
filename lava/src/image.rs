use log::debug;

use crate::{Heap, Numero, RefKind, RuntimeError, VmResult, Word};

/// Cells in a class row, and therefore constant pool slots per class.
pub const CLASS_CAPACITY: usize = 64;

/// A loaded class: a class row whose cells are its constant pool.
///
/// Slot 0 holds the entry method. Any other slot holds a method, a field
/// value, an ascii constant, a class name, an integer or an external
/// `Owner.member:descriptor` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassImage {
    name: String,
    class: Word,
}

impl ClassImage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> Word {
        self.class
    }
}

/// Resolves class names into images on a heap.
pub trait ClassLoader {
    fn load_class(&mut self, heap: &mut Heap, name: &str) -> VmResult<ClassImage>;
}

/// Lays out a class image directly on the heap.
///
/// Methods that call themselves or each other take their slot with
/// [`reserve`](Self::reserve) before the body is known and fill it with
/// [`define`](Self::define).
pub struct ClassImageBuilder<'h> {
    heap: &'h mut Heap,
    name: String,
    class: Word,
    next: usize,
}

impl<'h> ClassImageBuilder<'h> {
    pub fn new(heap: &'h mut Heap, name: &str) -> VmResult<Self> {
        let class = heap.create_row(RefKind::Class, CLASS_CAPACITY as i64)?;
        debug!("building class {name} at {class}");
        Ok(Self {
            heap,
            name: name.to_string(),
            class,
            next: 1,
        })
    }

    pub fn reserve(&mut self) -> VmResult<u16> {
        if self.next >= CLASS_CAPACITY {
            return Err(RuntimeError::ConstantPoolFull);
        }
        let index = self.next as u16;
        self.next += 1;
        Ok(index)
    }

    fn put(&mut self, value: Word) -> VmResult<u16> {
        let index = self.reserve()?;
        self.heap.row_store(self.class, i64::from(index), value)?;
        Ok(index)
    }

    pub fn define(&mut self, index: u16, params: u8, code: &[u8]) -> VmResult<()> {
        let method = self.heap.store_method(params, code)?;
        self.heap.row_store(self.class, i64::from(index), method)
    }

    /// The entry method, always at slot 0.
    pub fn entry(&mut self, params: u8, code: &[u8]) -> VmResult<()> {
        self.define(0, params, code)
    }

    pub fn method(&mut self, params: u8, code: &[u8]) -> VmResult<u16> {
        let index = self.reserve()?;
        self.define(index, params, code)?;
        Ok(index)
    }

    pub fn string(&mut self, text: &str) -> VmResult<u16> {
        let word = self.heap.store_ascii(RefKind::Ascii, text.as_bytes())?;
        self.put(word)
    }

    /// Class names are stored external, like every other symbolic name.
    pub fn class_name(&mut self, name: &str) -> VmResult<u16> {
        self.external(name)
    }

    /// A field slot, initialised with its own `Owner.name:Type` descriptor
    /// until the program stores a value there.
    pub fn field(&mut self, owner: &str, name: &str, ty: &str) -> VmResult<u16> {
        self.external(&format!("{owner}.{name}:{ty}"))
    }

    pub fn external(&mut self, descriptor: &str) -> VmResult<u16> {
        let word = self
            .heap
            .store_ascii(RefKind::External, descriptor.as_bytes())?;
        self.put(word)
    }

    pub fn integer(&mut self, value: i64) -> VmResult<u16> {
        let word = Numero::new(value)?.as_word();
        self.put(word)
    }

    pub fn finish(self) -> ClassImage {
        debug!("class {} uses {} pool slots", self.name, self.next);
        ClassImage {
            name: self.name,
            class: self.class,
        }
    }
}
