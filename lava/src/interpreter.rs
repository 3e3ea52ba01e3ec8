use std::{collections::HashMap, io::Write};

use log::{debug, info, trace, warn};

use crate::{
    CLASS_CAPACITY, ClassImage, ClassLoader, Comparison, Frame, Heap, HeapCreateInfo, Numero, Op,
    RefKind, RuntimeError, VmResult, Word,
    frame::MAX_ARGUMENTS,
    natives::{NativeFunction, NativeMethod, default_natives},
};

const MAX_FRAMES: usize = 1024;

/// How `ifeq`/`ifne`/`iflt`/`ifge`/`ifgt`/`ifle` test their operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroBranchMode {
    /// Each opcode uses its own comparison.
    #[default]
    PerOpcode,
    /// Every zero branch is taken iff the operand equals zero, whatever the
    /// opcode asks for. Matches programs built against that behaviour.
    EqualityOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrayLengthMode {
    #[default]
    Push,
    /// Compute the length and drop it.
    Discard,
}

#[derive(Debug, Clone)]
pub struct EngineCreateInfo {
    pub heap: HeapCreateInfo,
    pub zero_branches: ZeroBranchMode,
    pub array_length: ArrayLengthMode,
    pub max_frames: usize,
}

impl Default for EngineCreateInfo {
    fn default() -> Self {
        Self {
            heap: HeapCreateInfo::default(),
            zero_branches: ZeroBranchMode::default(),
            array_length: ArrayLengthMode::default(),
            max_frames: MAX_FRAMES,
        }
    }
}

/// The fetch-decode-execute loop.
///
/// `current` is the running activation, `frames` the suspended callers.
/// Program output goes to `out`, diagnostics go to the log.
pub struct Engine<W: Write> {
    heap: Heap,
    frames: Vec<Frame>,
    current: Option<Frame>,
    running: bool,
    zero_branches: ZeroBranchMode,
    array_length: ArrayLengthMode,
    max_frames: usize,
    natives: HashMap<&'static str, NativeFunction, ahash::RandomState>,
    out: W,
    executed: u64,
}

enum Call {
    Static,
    Virtual,
}

impl<W: Write> Engine<W> {
    pub fn new(info: EngineCreateInfo, out: W) -> Self {
        let mut engine = Self {
            heap: Heap::new(info.heap),
            frames: Vec::new(),
            current: None,
            running: false,
            zero_branches: info.zero_branches,
            array_length: info.array_length,
            max_frames: info.max_frames.max(1),
            natives: HashMap::default(),
            out,
            executed: 0,
        };
        for native in default_natives() {
            engine.register_native(native);
        }
        engine
    }

    pub fn register_native(&mut self, native: NativeMethod) {
        self.natives.insert(native.descriptor, native.func);
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Live activations, the current one included.
    pub fn call_depth(&self) -> usize {
        self.frames.len() + usize::from(self.current.is_some())
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Load `name` through `loader` and run its entry method to completion.
    pub fn launch(
        &mut self,
        loader: &mut impl ClassLoader,
        name: &str,
        args: &[String],
    ) -> VmResult<()> {
        let image = loader.load_class(&mut self.heap, name)?;
        self.start(&image, args)?;
        self.run()
    }

    /// Prepare the entry frame without running it.
    pub fn start(&mut self, image: &ClassImage, args: &[String]) -> VmResult<()> {
        debug!("starting {} with {} arguments", image.name(), args.len());
        let frame = Frame::entry(&mut self.heap, image.class(), args)?;
        self.frames.clear();
        self.current = Some(frame);
        self.running = true;
        self.executed = 0;
        Ok(())
    }

    /// Step until the outermost void return or the first fatal error.
    pub fn run(&mut self) -> VmResult<()> {
        while self.running {
            if let Err(err) = self.step() {
                self.running = false;
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn step(&mut self) -> VmResult<()> {
        let depth = self.call_depth();
        let heap = &mut self.heap;
        let frame = self.current.as_mut().ok_or(RuntimeError::NoFrame)?;

        let at = frame.cursor();
        let byte = frame.next(heap)?;
        let op = match Op::try_from(byte) {
            Ok(op) => op,
            Err(byte) => {
                warn!("unknown op {byte} ({byte:#x}) at {at}");
                return Ok(());
            }
        };
        trace!("[{depth}] {at:4}: {op}");
        self.executed += 1;

        match op {
            Op::IconstM1 => frame.push(Numero::from(-1i8)),
            Op::Iconst0 => frame.push(Numero::ZERO),
            Op::Iconst1 => frame.push(Numero::ONE),
            Op::Iconst2 => frame.push(Numero::TWO),
            Op::Iconst3 => frame.push(Numero::from(3i8)),
            Op::Iconst4 => frame.push(Numero::from(4i8)),
            Op::Iconst5 => frame.push(Numero::from(5i8)),
            Op::Bipush => {
                let value = frame.next(heap)? as i8;
                frame.push(Numero::from(value));
            }
            Op::Sipush => {
                let value = frame.next_i16(heap)?;
                frame.push(Numero::from(value));
            }
            Op::Ldc => {
                let index = frame.next(heap)?;
                let constant = frame.load_constant(heap, u16::from(index))?;
                frame.push(constant);
            }
            Op::Dup => {
                let top = frame.peek()?;
                frame.push(top);
            }
            Op::Pop => {
                frame.pop()?;
            }

            Op::Iadd => {
                let (a, b) = pop_pair(frame)?;
                frame.push(a + b);
            }
            Op::Isub => {
                let (a, b) = pop_pair(frame)?;
                frame.push(a - b);
            }
            Op::Imul => {
                let (a, b) = pop_pair(frame)?;
                frame.push(a * b);
            }
            Op::Idiv => {
                let (a, b) = pop_pair(frame)?;
                frame.push(signed_div_rem(a, b)?.0);
            }
            Op::Irem => {
                let (a, b) = pop_pair(frame)?;
                frame.push(signed_div_rem(a, b)?.1);
            }
            Op::Ineg => {
                let a = frame.pop_numero()?;
                frame.push(-a);
            }
            Op::Iinc => {
                let index = frame.next(heap)?;
                let delta = frame.next(heap)? as i8;
                frame.increment_local(usize::from(index), delta)?;
            }

            Op::Iload0 => load_int(frame, 0)?,
            Op::Iload1 => load_int(frame, 1)?,
            Op::Iload2 => load_int(frame, 2)?,
            Op::Iload3 => load_int(frame, 3)?,
            Op::Iload => {
                let index = frame.next(heap)?;
                load_int(frame, usize::from(index))?;
            }
            Op::Aload0 => load_reference(frame, 0)?,
            Op::Aload1 => load_reference(frame, 1)?,
            Op::Aload2 => load_reference(frame, 2)?,
            Op::Aload3 => load_reference(frame, 3)?,
            Op::Aload => {
                let index = frame.next(heap)?;
                load_reference(frame, usize::from(index))?;
            }
            Op::Istore0 | Op::Astore0 => store(frame, 0)?,
            Op::Istore1 | Op::Astore1 => store(frame, 1)?,
            Op::Istore2 | Op::Astore2 => store(frame, 2)?,
            Op::Istore3 | Op::Astore3 => store(frame, 3)?,
            Op::Istore | Op::Astore => {
                let index = frame.next(heap)?;
                store(frame, usize::from(index))?;
            }

            Op::Getstatic => {
                let index = frame.next_u16(heap)?;
                let value = frame.get_static(heap, index)?;
                frame.push(value);
            }
            Op::Putstatic => {
                let index = frame.next_u16(heap)?;
                let value = frame.pop()?;
                frame.put_static(heap, index, value)?;
            }
            Op::Getfield => {
                let index = frame.next_u16(heap)?;
                let object = frame.pop()?;
                let value = frame.get_field(heap, object, index)?;
                frame.push(value);
            }
            Op::Putfield => {
                let index = frame.next_u16(heap)?;
                let value = frame.pop()?;
                let object = frame.pop()?;
                frame.put_field(heap, object, index, value)?;
            }

            // ints and references share the same cells
            Op::Iaload | Op::Aaload => {
                let index = frame.pop_numero()?;
                let array = frame.pop()?;
                if array.is_null() {
                    warn!("{op} on a null array reference, nothing pushed");
                } else {
                    let value = heap.row_load(array.expect_kind(RefKind::Array)?, index.to_i64())?;
                    frame.push(value);
                }
            }
            Op::Iastore | Op::Aastore => {
                let value = frame.pop()?;
                let index = frame.pop_numero()?;
                let array = frame.pop()?;
                if array.is_null() {
                    warn!("{op} on a null array reference, value dropped");
                } else {
                    heap.row_store(array.expect_kind(RefKind::Array)?, index.to_i64(), value)?;
                }
            }
            Op::Arraylength => {
                let array = frame.pop()?;
                if array.is_null() {
                    warn!("arraylength on a null array reference");
                } else {
                    let length = heap.row_length(array.expect_kind(RefKind::Array)?)?;
                    match self.array_length {
                        ArrayLengthMode::Push => frame.push(Numero::new(length as i64)?),
                        ArrayLengthMode::Discard => debug!("array length {length} discarded"),
                    }
                }
            }
            // the element type is not tracked, both allocate the same row
            Op::Newarray | Op::Anewarray => {
                if op == Op::Newarray {
                    frame.next(heap)?;
                } else {
                    frame.next_u16(heap)?;
                }
                let count = frame.pop_numero()?;
                let array = heap.create_row(RefKind::Array, count.to_i64())?;
                frame.push(array);
            }
            Op::NewObj => {
                let index = frame.next_u16(heap)?;
                let name = frame.class_name_ref(heap, index)?;
                let object = heap.create_row(RefKind::Object, CLASS_CAPACITY as i64)?;
                heap.row_store(object, 0, name)?;
                frame.push(object);
            }
            Op::Checkcast => {
                let index = frame.next_u16(heap)?;
                let object = frame.peek()?;
                if object.ref_kind() == Some(RefKind::Object) {
                    let expected = frame.class_name(heap, index)?;
                    let actual = heap.load_string(heap.row_load(object, 0)?)?;
                    if expected != actual {
                        warn!("checkcast: object of class {actual} used as {expected}");
                    }
                } else if !object.is_null() {
                    debug!("checkcast on non-object {object} skipped");
                }
            }

            Op::Jmp => {
                let offset = frame.next_i16(heap)?;
                frame.jump(offset)?;
            }
            Op::IfIcmpeq
            | Op::IfIcmpne
            | Op::IfIcmplt
            | Op::IfIcmpge
            | Op::IfIcmpgt
            | Op::IfIcmple => {
                let offset = frame.next_i16(heap)?;
                let (a, b) = pop_pair(frame)?;
                if a.compare(b).satisfies(branch_test(op)) {
                    frame.jump(offset)?;
                }
            }
            Op::Ifeq | Op::Ifne | Op::Iflt | Op::Ifge | Op::Ifgt | Op::Ifle => {
                let offset = frame.next_i16(heap)?;
                let a = frame.pop_numero()?;
                let test = match self.zero_branches {
                    ZeroBranchMode::PerOpcode => branch_test(op),
                    ZeroBranchMode::EqualityOnly => Comparison::EQ,
                };
                if a.compare(Numero::ZERO).satisfies(test) {
                    frame.jump(offset)?;
                }
            }
            Op::Ifnull => {
                let offset = frame.next_i16(heap)?;
                let reference = frame.pop()?;
                if reference.is_null() {
                    frame.jump(offset)?;
                }
            }

            Op::ReturnV => self.return_void(),
            Op::Ireturn | Op::Areturn => {
                let value = frame.pop()?;
                self.return_value(value)?;
            }
            Op::Invokestatic => {
                let index = frame.next_u16(heap)?;
                self.invoke(index, Call::Static)?;
            }
            // invokespecial only reaches constructors, which behave like
            // any other instance method here
            Op::Invokevirtual | Op::Invokespecial => {
                let index = frame.next_u16(heap)?;
                self.invoke(index, Call::Virtual)?;
            }
        }
        Ok(())
    }

    fn return_void(&mut self) {
        match self.frames.pop() {
            Some(caller) => {
                debug!("return to depth {}", self.frames.len() + 1);
                self.current = Some(caller);
            }
            None => {
                info!("program finished after {} instructions", self.executed);
                self.current = None;
                self.running = false;
            }
        }
    }

    fn return_value(&mut self, value: Word) -> VmResult<()> {
        let mut caller = self.frames.pop().ok_or(RuntimeError::CallStackUnderflow)?;
        debug!("return {value} to depth {}", self.frames.len() + 1);
        caller.push(value);
        self.current = Some(caller);
        Ok(())
    }

    fn invoke(&mut self, index: u16, call: Call) -> VmResult<()> {
        let heap = &mut self.heap;
        let frame = self.current.as_mut().ok_or(RuntimeError::NoFrame)?;
        let target = frame.load_constant(heap, index)?;

        match target.ref_kind() {
            Some(RefKind::Method) => {}
            Some(RefKind::External) => {
                let descriptor = heap.load_string(target)?;
                match self.natives.get(descriptor.as_str()) {
                    Some(native) => {
                        debug!("native call {descriptor}");
                        native(heap, frame, &mut self.out)?;
                    }
                    None => warn!("unable to execute {descriptor}, call ignored"),
                }
                return Ok(());
            }
            _ => {
                return Err(RuntimeError::TypeError {
                    expected: "method or external",
                    got: target,
                });
            }
        }

        let mut callee = Frame::new(heap, frame.class(), index)?;
        let params = callee.params();
        if usize::from(params) > MAX_ARGUMENTS {
            return Err(RuntimeError::UnsupportedArity { params });
        }
        let mut args = (0..params)
            .map(|_| frame.pop())
            .collect::<VmResult<Vec<Word>>>()?;
        args.reverse();
        match call {
            Call::Static => callee.pass_static_params(&args)?,
            Call::Virtual => {
                let receiver = frame.pop()?;
                callee.pass_params(receiver, &args)?;
            }
        }

        if self.frames.len() + 2 > self.max_frames {
            return Err(RuntimeError::StackOverflow {
                depth: self.max_frames,
            });
        }
        if let Some(caller) = self.current.replace(callee) {
            self.frames.push(caller);
        }
        debug!("invoked #{index} ({params} params), depth {}", self.call_depth());
        Ok(())
    }
}

fn branch_test(op: Op) -> Comparison {
    match op {
        Op::Ifeq | Op::IfIcmpeq => Comparison::EQ,
        Op::Ifne | Op::IfIcmpne => Comparison::NE,
        Op::Iflt | Op::IfIcmplt => Comparison::LT,
        Op::Ifge | Op::IfIcmpge => Comparison::GE,
        Op::Ifgt | Op::IfIcmpgt => Comparison::GT,
        Op::Ifle | Op::IfIcmple => Comparison::LE,
        // not a compare branch, matches no outcome
        _ => Comparison::empty(),
    }
}

/// Pops `b` then `a`, for `a op b`.
fn pop_pair(frame: &mut Frame) -> VmResult<(Numero, Numero)> {
    let b = frame.pop_numero()?;
    let a = frame.pop_numero()?;
    Ok((a, b))
}

/// Truncating division on top of the unsigned `div_rem`: the quotient is
/// negative iff exactly one operand is, the remainder takes the sign of
/// the dividend.
fn signed_div_rem(a: Numero, b: Numero) -> VmResult<(Numero, Numero)> {
    let magnitude = |n: Numero| if n.is_negative() { -n } else { n };
    let (quotient, remainder) = magnitude(a).div_rem(magnitude(b))?;
    let quotient = if a.is_negative() != b.is_negative() {
        -quotient
    } else {
        quotient
    };
    let remainder = if a.is_negative() { -remainder } else { remainder };
    Ok((quotient, remainder))
}

fn load_int(frame: &mut Frame, index: usize) -> VmResult<()> {
    let value = frame
        .load_local(index)?
        .ok_or(RuntimeError::UninitializedLocal(index))?;
    frame.push(value);
    Ok(())
}

// local 0 of the entry method is where the program arguments live
fn load_reference(frame: &mut Frame, index: usize) -> VmResult<()> {
    match frame.load_local(index)? {
        Some(value) => frame.push(value),
        None if index == 0 => return Err(RuntimeError::MissingInput),
        None => {
            warn!("reference local {index} read before it was stored, pushing null");
            frame.push(Word::NULL);
        }
    }
    Ok(())
}

fn store(frame: &mut Frame, index: usize) -> VmResult<()> {
    let value = frame.pop()?;
    frame.store_local(index, value)
}
