use log::debug;

use crate::{Address, Arena, Heap, Numero, RefKind, RuntimeError, VmResult, Word};

pub const LOCAL_COUNT: usize = 8;
/// Widest calling convention, not counting the receiver.
pub const MAX_ARGUMENTS: usize = 3;

/// One activation: a method of a class, its operand stack and locals.
///
/// The cursor always points at the next unread byte of the method body.
/// A frame never holds on to the heap, every access borrows it.
#[derive(Debug)]
pub struct Frame {
    class: Word,
    method: Word,
    params: u8,
    base: Address,
    code_len: usize,
    cursor: usize,
    operands: Vec<Word>,
    locals: [Option<Word>; LOCAL_COUNT],
}

impl Frame {
    /// Activation of the method in pool slot `index` of `class`.
    pub fn new(heap: &Heap, class: Word, index: u16) -> VmResult<Self> {
        let method = heap
            .row_load(class, i64::from(index))?
            .expect_kind(RefKind::Method)?;
        let (params, code) = heap.load_method(method)?;
        let code_len = code.len();
        let (_, base) = heap.method_entry(method)?;
        debug!("new frame: class {class}, method #{index} ({params} params) at {base}");
        Ok(Self {
            class,
            method,
            params,
            base,
            code_len,
            cursor: 0,
            operands: Vec::new(),
            locals: [None; LOCAL_COUNT],
        })
    }

    /// Activation of the entry method (pool slot 0). The arguments are
    /// stored as ascii strings in a fresh array placed in local 0; with no
    /// arguments local 0 stays empty.
    pub fn entry(heap: &mut Heap, class: Word, args: &[String]) -> VmResult<Self> {
        let mut frame = Self::new(heap, class, 0)?;
        if args.is_empty() {
            debug!("entry method started without arguments");
            return Ok(frame);
        }
        let array = heap.create_row(RefKind::Array, args.len() as i64)?;
        for (index, arg) in args.iter().enumerate() {
            let text = heap.store_ascii(RefKind::Ascii, arg.as_bytes())?;
            heap.row_store(array, index as i64, text)?;
        }
        debug!("entry arguments {args:?} stored in {array}");
        frame.store_local(0, array)?;
        Ok(frame)
    }

    pub fn class(&self) -> Word {
        self.class
    }

    pub fn method(&self) -> Word {
        self.method
    }

    pub fn params(&self) -> u8 {
        self.params
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn stack_len(&self) -> usize {
        self.operands.len()
    }

    pub fn next(&mut self, heap: &Heap) -> VmResult<u8> {
        let address = self
            .base
            .offset(self.cursor)
            .filter(|_| self.cursor < self.code_len)
            .ok_or(RuntimeError::BadAddress {
                address: self.base.get().saturating_add(self.cursor as u32),
                arena: Arena::Byte,
            })?;
        self.cursor += 1;
        heap.read_byte(address)
    }

    pub fn next_u16(&mut self, heap: &Heap) -> VmResult<u16> {
        let high = self.next(heap)?;
        let low = self.next(heap)?;
        Ok(u16::from_be_bytes([high, low]))
    }

    pub fn next_i16(&mut self, heap: &Heap) -> VmResult<i16> {
        self.next_u16(heap).map(|raw| raw as i16)
    }

    /// Relative jump, `offset` counted from the branch opcode. The opcode
    /// and its two operand bytes are already consumed.
    pub fn jump(&mut self, offset: i16) -> VmResult<()> {
        let target = self.cursor as i64 + i64::from(offset) - 3;
        if !(0..self.code_len as i64).contains(&target) {
            return Err(RuntimeError::InvalidJump { target });
        }
        self.cursor = target as usize;
        Ok(())
    }

    pub fn push(&mut self, word: impl Into<Word>) {
        self.operands.push(word.into());
    }

    pub fn pop(&mut self) -> VmResult<Word> {
        self.operands.pop().ok_or(RuntimeError::StackUnderflow)
    }

    pub fn pop_numero(&mut self) -> VmResult<Numero> {
        self.pop().map(Word::to_numero)
    }

    pub fn peek(&self) -> VmResult<Word> {
        self.operands
            .last()
            .copied()
            .ok_or(RuntimeError::StackUnderflow)
    }

    pub fn load_local(&self, index: usize) -> VmResult<Option<Word>> {
        self.locals
            .get(index)
            .copied()
            .ok_or(RuntimeError::LocalIndex(index))
    }

    pub fn store_local(&mut self, index: usize, word: impl Into<Word>) -> VmResult<()> {
        let slot = self
            .locals
            .get_mut(index)
            .ok_or(RuntimeError::LocalIndex(index))?;
        *slot = Some(word.into());
        Ok(())
    }

    pub fn increment_local(&mut self, index: usize, delta: i8) -> VmResult<()> {
        let value = self
            .load_local(index)?
            .ok_or(RuntimeError::UninitializedLocal(index))?
            .to_numero();
        let value = match delta {
            1 => value.increment(),
            _ => value + Numero::from(delta),
        };
        self.store_local(index, value)
    }

    fn check_arity(&self, got: usize) -> VmResult<()> {
        if usize::from(self.params) > MAX_ARGUMENTS {
            return Err(RuntimeError::UnsupportedArity {
                params: self.params,
            });
        }
        if got != usize::from(self.params) {
            return Err(RuntimeError::ArityMismatch {
                expected: self.params,
                got,
            });
        }
        Ok(())
    }

    /// Arguments of a static call go to locals `0..n`.
    pub fn pass_static_params(&mut self, args: &[Word]) -> VmResult<()> {
        self.check_arity(args.len())?;
        for (slot, &arg) in self.locals.iter_mut().zip(args) {
            *slot = Some(arg);
        }
        Ok(())
    }

    /// The receiver goes to local 0, arguments to `1..=n`.
    pub fn pass_params(&mut self, receiver: Word, args: &[Word]) -> VmResult<()> {
        self.check_arity(args.len())?;
        self.locals[0] = Some(receiver);
        for (slot, &arg) in self.locals[1..].iter_mut().zip(args) {
            *slot = Some(arg);
        }
        Ok(())
    }

    pub fn load_constant(&self, heap: &Heap, index: u16) -> VmResult<Word> {
        heap.row_load(self.class, i64::from(index))
    }

    pub fn get_static(&self, heap: &Heap, index: u16) -> VmResult<Word> {
        heap.row_load(self.class, i64::from(index))
    }

    pub fn put_static(&self, heap: &mut Heap, index: u16, value: Word) -> VmResult<()> {
        heap.row_store(self.class, i64::from(index), value)
    }

    /// Instance fields live in the object row at their pool index.
    pub fn get_field(&self, heap: &Heap, object: Word, index: u16) -> VmResult<Word> {
        heap.row_load(object.expect_kind(RefKind::Object)?, i64::from(index))
    }

    pub fn put_field(&self, heap: &mut Heap, object: Word, index: u16, value: Word) -> VmResult<()> {
        heap.row_store(object.expect_kind(RefKind::Object)?, i64::from(index), value)
    }

    pub fn class_name_ref(&self, heap: &Heap, index: u16) -> VmResult<Word> {
        self.load_constant(heap, index)
    }

    pub fn class_name(&self, heap: &Heap, index: u16) -> VmResult<String> {
        heap.load_string(self.class_name_ref(heap, index)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_with(heap: &mut Heap, params: u8, code: &[u8]) -> Word {
        let class = heap.create_row(RefKind::Class, 64).expect("class row");
        let method = heap.store_method(params, code).expect("method");
        heap.row_store(class, 0, method).expect("slot 0");
        class
    }

    #[test]
    fn fetch_walks_the_method_body() {
        let mut heap = Heap::default();
        let class = class_with(&mut heap, 0, &[0x11, 0xff, 0xfe, 0xb1]);
        let mut frame = Frame::new(&heap, class, 0).expect("frame");
        assert_eq!(frame.next(&heap), Ok(0x11));
        assert_eq!(frame.next_i16(&heap), Ok(-2));
        assert_eq!(frame.next(&heap), Ok(0xb1));
        assert!(frame.next(&heap).is_err(), "reading past the body must fail");
    }

    #[test]
    fn jump_is_relative_to_the_branch_opcode() {
        let mut heap = Heap::default();
        let class = class_with(&mut heap, 0, &[0x00, 0x00, 0xa7, 0xff, 0xfe, 0xb1]);
        let mut frame = Frame::new(&heap, class, 0).expect("frame");
        for _ in 0..5 {
            frame.next(&heap).expect("in body");
        }
        frame.jump(-2).expect("in body");
        assert_eq!(frame.cursor(), 0);
        assert_eq!(frame.jump(-10), Err(RuntimeError::InvalidJump { target: -13 }));
        assert!(frame.jump(100).is_err());
    }

    #[test]
    fn locals_are_bounded() {
        let mut heap = Heap::default();
        let class = class_with(&mut heap, 0, &[0xb1]);
        let mut frame = Frame::new(&heap, class, 0).expect("frame");
        assert_eq!(frame.load_local(7), Ok(None));
        assert_eq!(frame.load_local(8), Err(RuntimeError::LocalIndex(8)));
        assert_eq!(
            frame.store_local(8, Word::NULL),
            Err(RuntimeError::LocalIndex(8))
        );
        assert_eq!(
            frame.increment_local(3, 1),
            Err(RuntimeError::UninitializedLocal(3))
        );
        frame.store_local(3, Numero::new(41).expect("in range")).expect("slot 3");
        frame.increment_local(3, 1).expect("initialised");
        frame.increment_local(3, -10).expect("initialised");
        let value = frame.load_local(3).expect("slot 3").expect("set").to_numero();
        assert_eq!(value.to_i64(), 32);
    }

    #[test]
    fn stack_underflow_is_reported() {
        let mut heap = Heap::default();
        let class = class_with(&mut heap, 0, &[0xb1]);
        let mut frame = Frame::new(&heap, class, 0).expect("frame");
        assert_eq!(frame.pop(), Err(RuntimeError::StackUnderflow));
        frame.push(Word::NULL);
        assert_eq!(frame.peek(), Ok(Word::NULL));
        assert_eq!(frame.pop(), Ok(Word::NULL));
    }

    #[test]
    fn entry_frame_stores_arguments_in_local_zero() {
        let mut heap = Heap::default();
        let class = class_with(&mut heap, 1, &[0xb1]);
        let frame = Frame::entry(&mut heap, class, &["12".to_string(), "ab".to_string()])
            .expect("entry frame");
        let array = frame.load_local(0).expect("slot 0").expect("arguments");
        assert_eq!(heap.row_length(array), Ok(2));
        let second = heap.row_load(array, 1).expect("in bounds");
        assert_eq!(heap.load_ascii(second).expect("ascii"), b"ab");

        let empty = Frame::entry(&mut heap, class, &[]).expect("entry frame");
        assert_eq!(empty.load_local(0), Ok(None));
    }

    #[test]
    fn parameter_passing_checks_arity() {
        let mut heap = Heap::default();
        let class = class_with(&mut heap, 2, &[0xb1]);
        let one = Numero::ONE.as_word();
        let two = Numero::TWO.as_word();

        let mut frame = Frame::new(&heap, class, 0).expect("frame");
        frame.pass_static_params(&[one, two]).expect("two params");
        assert_eq!(frame.load_local(1), Ok(Some(two)));

        let mut frame = Frame::new(&heap, class, 0).expect("frame");
        let receiver = heap.create_row(RefKind::Object, 64).expect("object");
        frame.pass_params(receiver, &[one, two]).expect("two params");
        assert_eq!(frame.load_local(0), Ok(Some(receiver)));
        assert_eq!(frame.load_local(2), Ok(Some(two)));

        assert_eq!(
            frame.pass_static_params(&[one]),
            Err(RuntimeError::ArityMismatch {
                expected: 2,
                got: 1
            })
        );

        let wide = class_with(&mut heap, 4, &[0xb1]);
        let mut frame = Frame::new(&heap, wide, 0).expect("frame");
        assert_eq!(
            frame.pass_static_params(&[one, one, one, one]),
            Err(RuntimeError::UnsupportedArity { params: 4 })
        );
    }
}
