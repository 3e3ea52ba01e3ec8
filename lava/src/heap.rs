use std::collections::HashSet;

use log::debug;

use crate::{
    Arena, RefKind, RuntimeError, VmResult, Word,
    tagged::{ADDRESS_SPACE, Address},
};

/// Longest blob the one byte length prefix can describe.
pub const MAX_BLOB: usize = 255;

#[derive(Debug, Default, Clone)]
pub struct HeapCreateInfo {
    // clamped to the 16 bit byte address space
    pub byte_capacity: Option<usize>,
    pub word_capacity: Option<usize>,
    pub max_array_length: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct HeapSettings {
    byte_capacity: usize,
    word_capacity: usize,
    max_array_length: usize,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            byte_capacity: Address::WORD_BASE as usize,
            word_capacity: 65536,
            max_array_length: 1023,
        }
    }
}

/// Two append-only arenas sharing one address space.
///
/// Byte arena, addresses `1..65536`:
///   ascii / external  `[len][bytes; len][0]`
///   method            `[len][params][code; len][0]`
/// Word arena, addresses `65536..`:
///   row               `[len][cells; len]`
///
/// Address 0 is never handed out so the all-zero word stays null.
/// A row reference is only honoured if it names a header handed out by
/// [`Heap::create_row`].
#[derive(Debug)]
pub struct Heap {
    bytes: Vec<u8>,
    words: Vec<Word>,
    rows: HashSet<usize, ahash::RandomState>,
    settings: HeapSettings,
}

impl Heap {
    pub fn new(info: HeapCreateInfo) -> Self {
        let mut settings = HeapSettings::default();
        info.byte_capacity
            .inspect(|&val| settings.byte_capacity = val.min(Address::WORD_BASE as usize));
        info.word_capacity.inspect(|&val| {
            settings.word_capacity = val.min((ADDRESS_SPACE as usize) - Address::WORD_BASE as usize)
        });
        info.max_array_length
            .inspect(|&val| settings.max_array_length = val);

        let mut bytes = Vec::with_capacity(settings.byte_capacity.min(4096));
        bytes.push(0);
        Self {
            bytes,
            words: Vec::new(),
            rows: HashSet::default(),
            settings,
        }
    }

    pub fn max_array_length(&self) -> usize {
        self.settings.max_array_length
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes.len()
    }

    pub fn words_used(&self) -> usize {
        self.words.len()
    }

    fn reserve_bytes(&mut self, requested: usize) -> VmResult<Address> {
        let start = self.bytes.len();
        if start + requested > self.settings.byte_capacity {
            return Err(RuntimeError::ArenaExhausted {
                arena: Arena::Byte,
                requested,
            });
        }
        Ok(Address::new(start as u32))
    }

    /// Store a byte string, tagged `Ascii` or `External`.
    pub fn store_ascii(&mut self, kind: RefKind, text: &[u8]) -> VmResult<Word> {
        if !matches!(kind, RefKind::Ascii | RefKind::External) {
            return Err(RuntimeError::TypeError {
                expected: "ascii or external",
                got: Word::reference(kind, 0)?,
            });
        }
        if text.is_empty() || text.len() > MAX_BLOB {
            return Err(RuntimeError::BlobLength { len: text.len() });
        }
        let address = self.reserve_bytes(text.len() + 2)?;
        self.bytes.push(text.len() as u8);
        self.bytes.extend_from_slice(text);
        self.bytes.push(0);
        debug!(
            "stored {} {:?} at {address}",
            kind.name(),
            String::from_utf8_lossy(text)
        );
        Word::reference(kind, address.get())
    }

    pub fn store_method(&mut self, params: u8, code: &[u8]) -> VmResult<Word> {
        if code.is_empty() || code.len() > MAX_BLOB {
            return Err(RuntimeError::BlobLength { len: code.len() });
        }
        let address = self.reserve_bytes(code.len() + 3)?;
        self.bytes.push(code.len() as u8);
        self.bytes.push(params);
        self.bytes.extend_from_slice(code);
        self.bytes.push(0);
        debug!(
            "stored method ({params} params, {} bytes) at {address}",
            code.len()
        );
        Word::reference(RefKind::Method, address.get())
    }

    fn blob_start(&self, word: Word) -> VmResult<usize> {
        let address = word.address();
        let start = address.get() as usize;
        if !address.in_byte_arena() || start == 0 || start >= self.bytes.len() {
            return Err(RuntimeError::BadAddress {
                address: address.get(),
                arena: Arena::Byte,
            });
        }
        Ok(start)
    }

    pub fn load_ascii(&self, word: Word) -> VmResult<&[u8]> {
        match word.ref_kind() {
            Some(RefKind::Ascii | RefKind::External) => {}
            _ => {
                return Err(RuntimeError::TypeError {
                    expected: "ascii",
                    got: word,
                });
            }
        }
        let start = self.blob_start(word)?;
        let len = self.bytes[start] as usize;
        self.bytes
            .get(start + 1..start + 1 + len)
            .ok_or(RuntimeError::BadAddress {
                address: word.address().get(),
                arena: Arena::Byte,
            })
    }

    /// Like [`Heap::load_ascii`] but lossily decoded, for output and logs.
    pub fn load_string(&self, word: Word) -> VmResult<String> {
        self.load_ascii(word)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Parameter count and bytecode of a method blob.
    pub fn load_method(&self, word: Word) -> VmResult<(u8, &[u8])> {
        word.expect_kind(RefKind::Method)?;
        let start = self.blob_start(word)?;
        let len = self.bytes[start] as usize;
        let code = self
            .bytes
            .get(start + 2..start + 2 + len)
            .ok_or(RuntimeError::BadAddress {
                address: word.address().get(),
                arena: Arena::Byte,
            })?;
        Ok((self.bytes[start + 1], code))
    }

    /// Parameter count and absolute address of the first instruction.
    pub fn method_entry(&self, word: Word) -> VmResult<(u8, Address)> {
        let (params, _) = self.load_method(word)?;
        let base = word.address().offset(2).ok_or(RuntimeError::BadAddress {
            address: word.address().get(),
            arena: Arena::Byte,
        })?;
        Ok((params, base))
    }

    pub fn read_byte(&self, address: Address) -> VmResult<u8> {
        if !address.in_byte_arena() {
            return Err(RuntimeError::BadAddress {
                address: address.get(),
                arena: Arena::Byte,
            });
        }
        self.bytes
            .get(address.get() as usize)
            .copied()
            .ok_or(RuntimeError::BadAddress {
                address: address.get(),
                arena: Arena::Byte,
            })
    }

    /// Allocate a zeroed row of `len` cells tagged `kind`.
    pub fn create_row(&mut self, kind: RefKind, len: i64) -> VmResult<Word> {
        if !kind.is_row() {
            return Err(RuntimeError::TypeError {
                expected: "array, class or object",
                got: Word::reference(kind, 0)?,
            });
        }
        let max = self.settings.max_array_length;
        let cells = usize::try_from(len)
            .ok()
            .filter(|&cells| cells <= max)
            .ok_or(RuntimeError::ArrayLength { len, max })?;

        let start = self.words.len();
        if start + cells + 1 > self.settings.word_capacity {
            return Err(RuntimeError::ArenaExhausted {
                arena: Arena::Word,
                requested: cells + 1,
            });
        }
        self.words.push(Word::from_raw(len)?);
        self.words.resize(start + cells + 1, Word::NULL);
        self.rows.insert(start);

        let address = Address::WORD_BASE + start as u32;
        debug!("created {} row of {cells} at @{address}", kind.name());
        Word::reference(kind, address)
    }

    /// Index of the length cell of `row`.
    fn row_header(&self, row: Word) -> VmResult<(usize, usize)> {
        match row.ref_kind() {
            Some(kind) if kind.is_row() => {}
            _ => {
                return Err(RuntimeError::TypeError {
                    expected: "array, class or object",
                    got: row,
                });
            }
        }
        let address = row.address();
        let bad = RuntimeError::BadAddress {
            address: address.get(),
            arena: Arena::Word,
        };
        if address.in_byte_arena() {
            return Err(bad);
        }
        let header = (address.get() - Address::WORD_BASE) as usize;
        if !self.rows.contains(&header) {
            return Err(bad);
        }
        let length = self.words.get(header).ok_or(bad)?.to_raw() as usize;
        Ok((header, length))
    }

    pub fn row_length(&self, row: Word) -> VmResult<usize> {
        self.row_header(row).map(|(_, length)| length)
    }

    fn cell(&self, row: Word, index: i64) -> VmResult<usize> {
        let (header, length) = self.row_header(row)?;
        usize::try_from(index)
            .ok()
            .filter(|&index| index < length)
            .map(|index| header + 1 + index)
            .ok_or(RuntimeError::RowIndex { index, length })
    }

    pub fn row_load(&self, row: Word, index: i64) -> VmResult<Word> {
        let cell = self.cell(row, index)?;
        self.words.get(cell).copied().ok_or(RuntimeError::BadAddress {
            address: row.address().get(),
            arena: Arena::Word,
        })
    }

    pub fn row_store(&mut self, row: Word, index: i64, value: Word) -> VmResult<()> {
        let cell = self.cell(row, index)?;
        let slot = self.words.get_mut(cell).ok_or(RuntimeError::BadAddress {
            address: row.address().get(),
            arena: Arena::Word,
        })?;
        *slot = value;
        Ok(())
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(HeapCreateInfo::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arenas_are_disjoint() {
        let mut heap = Heap::default();
        let text = heap.store_ascii(RefKind::Ascii, b"hello").expect("fits");
        let method = heap.store_method(1, &[0xb1]).expect("fits");
        let row = heap.create_row(RefKind::Array, 4).expect("fits");
        assert!(text.address().get() < 65536 && text.address().get() > 0);
        assert!(method.address().get() < 65536);
        assert!(row.address().get() >= 65536);
        assert_eq!(row.address().get(), 65536, "first row sits on the boundary");
    }

    #[test]
    fn blobs_round_trip() {
        let mut heap = Heap::default();
        let text = heap.store_ascii(RefKind::Ascii, b"abc").expect("fits");
        let external = heap
            .store_ascii(RefKind::External, b"java/lang/Object.<init>:()V")
            .expect("fits");
        let method = heap.store_method(2, &[0x1a, 0x1b, 0x60, 0xac]).expect("fits");
        assert_eq!(heap.load_ascii(text).expect("ascii"), b"abc");
        assert_eq!(
            heap.load_string(external).expect("external"),
            "java/lang/Object.<init>:()V"
        );
        let (params, code) = heap.load_method(method).expect("method");
        assert_eq!(params, 2);
        assert_eq!(code, &[0x1a, 0x1b, 0x60, 0xac]);

        let (_, base) = heap.method_entry(method).expect("method");
        assert_eq!(heap.read_byte(base).expect("in arena"), 0x1a);
        assert_eq!(base.get(), method.address().get() + 2);
    }

    #[test]
    fn blob_length_is_bounded() {
        let mut heap = Heap::default();
        assert_eq!(
            heap.store_ascii(RefKind::Ascii, b""),
            Err(RuntimeError::BlobLength { len: 0 })
        );
        let long = vec![b'x'; 256];
        assert_eq!(
            heap.store_ascii(RefKind::Ascii, &long),
            Err(RuntimeError::BlobLength { len: 256 })
        );
        assert!(heap.store_ascii(RefKind::Ascii, &long[..255]).is_ok());
        assert!(heap.store_ascii(RefKind::Array, b"no").is_err());
    }

    #[test]
    fn rows_round_trip_and_check_bounds() {
        let mut heap = Heap::default();
        let row = heap.create_row(RefKind::Array, 3).expect("fits");
        let value = Word::reference(RefKind::Ascii, 12).expect("valid");
        heap.row_store(row, 2, value).expect("in bounds");
        assert_eq!(heap.row_load(row, 2), Ok(value));
        assert_eq!(heap.row_load(row, 0), Ok(Word::NULL));
        assert_eq!(heap.row_length(row), Ok(3));
        assert_eq!(
            heap.row_load(row, 3),
            Err(RuntimeError::RowIndex {
                index: 3,
                length: 3
            })
        );
        assert!(heap.row_store(row, -1, value).is_err());

        let second = heap.create_row(RefKind::Object, 64).expect("fits");
        assert_eq!(second.address().get(), 65536 + 4);
        assert_eq!(heap.row_length(second), Ok(64));
    }

    #[test]
    fn array_length_is_bounded() {
        let mut heap = Heap::default();
        assert_eq!(
            heap.create_row(RefKind::Array, -1),
            Err(RuntimeError::ArrayLength { len: -1, max: 1023 })
        );
        assert_eq!(
            heap.create_row(RefKind::Array, 1024),
            Err(RuntimeError::ArrayLength {
                len: 1024,
                max: 1023
            })
        );
        assert!(heap.create_row(RefKind::Array, 0).is_ok());
        assert!(heap.create_row(RefKind::Array, 1023).is_ok());
    }

    #[test]
    fn arenas_exhaust() {
        let mut heap = Heap::new(HeapCreateInfo {
            byte_capacity: Some(16),
            word_capacity: Some(10),
            ..Default::default()
        });
        heap.store_ascii(RefKind::Ascii, b"0123456789").expect("fits");
        assert_eq!(
            heap.store_ascii(RefKind::Ascii, b"abc"),
            Err(RuntimeError::ArenaExhausted {
                arena: Arena::Byte,
                requested: 5
            })
        );
        heap.create_row(RefKind::Array, 8).expect("fits");
        assert!(matches!(
            heap.create_row(RefKind::Array, 1),
            Err(RuntimeError::ArenaExhausted {
                arena: Arena::Word,
                ..
            })
        ));
    }

    #[test]
    fn bad_addresses_are_rejected() {
        let heap = Heap::default();
        assert!(heap.read_byte(Address::new(70_000)).is_err());
        assert!(heap.read_byte(Address::new(500)).is_err());
        let dangling = Word::reference(RefKind::Array, 65536 + 10).expect("valid");
        assert!(heap.row_length(dangling).is_err());
        let ascii = Word::reference(RefKind::Ascii, 40).expect("valid");
        assert!(heap.load_ascii(ascii).is_err());
    }

    #[test]
    fn forged_mid_row_reference_is_rejected() {
        let mut heap = Heap::default();
        let row = heap.create_row(RefKind::Array, 4).expect("fits");
        heap.row_store(row, 1, Word::from_raw(1000).expect("raw"))
            .expect("in bounds");

        // points at cell 1, whose value would pass for a length of 1000
        let forged = Word::reference(RefKind::Array, row.address().get() + 2).expect("valid");
        let bad = RuntimeError::BadAddress {
            address: forged.address().get(),
            arena: Arena::Word,
        };
        assert_eq!(heap.row_length(forged), Err(bad.clone()));
        assert_eq!(heap.row_load(forged, 999), Err(bad.clone()));
        assert_eq!(heap.row_store(forged, 999, Word::NULL), Err(bad));
        assert_eq!(heap.row_length(row), Ok(4), "the real row is untouched");
    }
}
