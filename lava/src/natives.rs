//! Emulated standard-library entry points.
//!
//! A call whose pool slot holds an external descriptor is looked up here by
//! its exact descriptor string. Each native pops its own arguments (and the
//! receiver, for instance methods) off the caller's operand stack.
use std::io::Write;

use log::{debug, warn};

use crate::{Frame, Heap, Numero, RefKind, RuntimeError, VmResult, Word, heap::MAX_BLOB};

pub mod descriptors {
    pub const PRINTLN_STRING: &str = "java/io/PrintStream.println:(Ljava/lang/String;)V";
    pub const PRINTLN_INT: &str = "java/io/PrintStream.println:(I)V";
    pub const PARSE_INT: &str = "java/lang/Integer.parseInt:(Ljava/lang/String;)I";
    pub const BUILDER_INIT: &str = "java/lang/StringBuilder.<init>:()V";
    pub const BUILDER_APPEND_STRING: &str =
        "java/lang/StringBuilder.append:(Ljava/lang/String;)Ljava/lang/StringBuilder;";
    pub const BUILDER_APPEND_INT: &str =
        "java/lang/StringBuilder.append:(I)Ljava/lang/StringBuilder;";
    pub const BUILDER_TO_STRING: &str = "java/lang/StringBuilder.toString:()Ljava/lang/String;";
    pub const OBJECT_INIT: &str = "java/lang/Object.<init>:()V";
}

pub type NativeFunction = fn(&mut Heap, &mut Frame, &mut dyn Write) -> VmResult<()>;

#[derive(Clone, Copy)]
pub struct NativeMethod {
    pub descriptor: &'static str,
    pub func: NativeFunction,
}

impl NativeMethod {
    pub const fn new(descriptor: &'static str, func: NativeFunction) -> Self {
        Self { descriptor, func }
    }
}

impl std::fmt::Debug for NativeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeMethod({})", self.descriptor)
    }
}

pub fn default_natives() -> Vec<NativeMethod> {
    use descriptors::*;
    vec![
        NativeMethod::new(PRINTLN_STRING, println_string),
        NativeMethod::new(PRINTLN_INT, println_int),
        NativeMethod::new(PARSE_INT, parse_int),
        NativeMethod::new(BUILDER_INIT, builder_init),
        NativeMethod::new(BUILDER_APPEND_STRING, builder_append_string),
        NativeMethod::new(BUILDER_APPEND_INT, builder_append_int),
        NativeMethod::new(BUILDER_TO_STRING, builder_to_string),
        NativeMethod::new(OBJECT_INIT, object_init),
    ]
}

// `System.out` is never materialised, the receiver is whatever the
// getstatic left behind and is dropped.
fn println_string(heap: &mut Heap, frame: &mut Frame, out: &mut dyn Write) -> VmResult<()> {
    let text = frame.pop()?;
    let _stream = frame.pop()?;
    let text = heap.load_ascii(text)?;
    out.write_all(text)?;
    out.write_all(b"\n")?;
    Ok(())
}

fn println_int(_heap: &mut Heap, frame: &mut Frame, out: &mut dyn Write) -> VmResult<()> {
    let value = frame.pop()?;
    if value.is_reference() {
        warn!("println(int) called with reference {value}");
    }
    let _stream = frame.pop()?;
    writeln!(out, "{}", value.to_numero())?;
    Ok(())
}

fn parse_int(heap: &mut Heap, frame: &mut Frame, _out: &mut dyn Write) -> VmResult<()> {
    let text = heap.load_string(frame.pop()?)?;
    let value = text
        .parse::<i64>()
        .map_err(|_| RuntimeError::ParseInt(text.clone()))?;
    frame.push(Numero::new(value)?);
    Ok(())
}

/// Builder object slots. Slot 0 is the class name like any object.
const BUFFER: i64 = 1;
const LENGTH: i64 = 2;
const INITIAL_CAPACITY: usize = 32;

fn builder_init(heap: &mut Heap, frame: &mut Frame, _out: &mut dyn Write) -> VmResult<()> {
    let builder = frame.pop()?.expect_kind(RefKind::Object)?;
    let buffer = heap.create_row(RefKind::Array, INITIAL_CAPACITY as i64)?;
    heap.row_store(builder, BUFFER, buffer)?;
    heap.row_store(builder, LENGTH, Numero::ZERO.as_word())?;
    debug!("string builder {builder} backed by {buffer}");
    Ok(())
}

/// Copy `bytes` after the current contents, growing the buffer by doubling.
fn append(heap: &mut Heap, builder: Word, bytes: &[u8]) -> VmResult<()> {
    let builder = builder.expect_kind(RefKind::Object)?;
    let mut buffer = heap.row_load(builder, BUFFER)?;
    let len = heap.row_load(builder, LENGTH)?.to_numero().to_i64() as usize;
    let needed = len + bytes.len();
    if needed > MAX_BLOB {
        return Err(RuntimeError::BlobLength { len: needed });
    }

    let capacity = heap.row_length(buffer)?;
    if needed > capacity {
        let mut grown = capacity.max(1);
        while grown < needed {
            grown *= 2;
        }
        let grown = grown.min(MAX_BLOB);
        let larger = heap.create_row(RefKind::Array, grown as i64)?;
        for index in 0..len as i64 {
            let cell = heap.row_load(buffer, index)?;
            heap.row_store(larger, index, cell)?;
        }
        debug!("string builder {builder} grew from {capacity} to {grown}");
        heap.row_store(builder, BUFFER, larger)?;
        buffer = larger;
    }

    for (offset, &byte) in bytes.iter().enumerate() {
        heap.row_store(buffer, (len + offset) as i64, Numero::from(i16::from(byte)).as_word())?;
    }
    heap.row_store(builder, LENGTH, Numero::new(needed as i64)?.as_word())
}

fn builder_append_string(heap: &mut Heap, frame: &mut Frame, _out: &mut dyn Write) -> VmResult<()> {
    let text = frame.pop()?;
    let builder = frame.pop()?;
    let bytes = heap.load_ascii(text)?.to_vec();
    append(heap, builder, &bytes)?;
    frame.push(builder);
    Ok(())
}

fn builder_append_int(heap: &mut Heap, frame: &mut Frame, _out: &mut dyn Write) -> VmResult<()> {
    let value = frame.pop_numero()?;
    let builder = frame.pop()?;
    append(heap, builder, value.to_string().as_bytes())?;
    frame.push(builder);
    Ok(())
}

fn builder_to_string(heap: &mut Heap, frame: &mut Frame, _out: &mut dyn Write) -> VmResult<()> {
    let builder = frame.pop()?.expect_kind(RefKind::Object)?;
    let buffer = heap.row_load(builder, BUFFER)?;
    let len = heap.row_load(builder, LENGTH)?.to_numero().to_i64();
    let bytes = (0..len)
        .map(|index| heap.row_load(buffer, index).map(|cell| cell.to_numero().to_i64() as u8))
        .collect::<VmResult<Vec<u8>>>()?;
    let text = heap.store_ascii(RefKind::Ascii, &bytes)?;
    frame.push(text);
    Ok(())
}

fn object_init(heap: &mut Heap, frame: &mut Frame, _out: &mut dyn Write) -> VmResult<()> {
    let object = frame.pop()?.expect_kind(RefKind::Object)?;
    let name = heap.row_load(object, 0)?;
    debug!("initialised {object} of class {}", heap.load_string(name)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClassImageBuilder;

    fn frame_on(heap: &mut Heap) -> Frame {
        let mut builder = ClassImageBuilder::new(heap, "Natives").expect("class");
        builder.entry(0, &[0xb1]).expect("entry");
        let image = builder.finish();
        Frame::new(heap, image.class(), 0).expect("frame")
    }

    fn builder_object(heap: &mut Heap) -> Word {
        let object = heap.create_row(RefKind::Object, 64).expect("object");
        let name = heap
            .store_ascii(RefKind::External, b"java/lang/StringBuilder")
            .expect("name");
        heap.row_store(object, 0, name).expect("slot 0");
        object
    }

    #[test]
    fn println_writes_to_the_sink() {
        let mut heap = Heap::default();
        let mut frame = frame_on(&mut heap);
        let mut out = Vec::new();
        let text = heap.store_ascii(RefKind::Ascii, b"hello").expect("text");
        frame.push(Word::NULL);
        frame.push(text);
        println_string(&mut heap, &mut frame, &mut out).expect("println");
        frame.push(Word::NULL);
        frame.push(Numero::new(-42).expect("in range"));
        println_int(&mut heap, &mut frame, &mut out).expect("println");
        assert_eq!(String::from_utf8(out).expect("utf8"), "hello\n-42\n");
        assert_eq!(frame.stack_len(), 0, "receiver and argument are consumed");
    }

    #[test]
    fn parse_int_reports_bad_input() {
        let mut heap = Heap::default();
        let mut frame = frame_on(&mut heap);
        let good = heap.store_ascii(RefKind::Ascii, b"-17").expect("text");
        frame.push(good);
        parse_int(&mut heap, &mut frame, &mut std::io::sink()).expect("parses");
        assert_eq!(frame.pop_numero().map(Numero::to_i64), Ok(-17));

        let bad = heap.store_ascii(RefKind::Ascii, b"x1").expect("text");
        frame.push(bad);
        assert_eq!(
            parse_int(&mut heap, &mut frame, &mut std::io::sink()),
            Err(RuntimeError::ParseInt("x1".to_string()))
        );

        let padded = heap.store_ascii(RefKind::Ascii, b" 5").expect("text");
        frame.push(padded);
        assert_eq!(
            parse_int(&mut heap, &mut frame, &mut std::io::sink()),
            Err(RuntimeError::ParseInt(" 5".to_string()))
        );
    }

    #[test]
    fn string_builder_concatenates() {
        let mut heap = Heap::default();
        let mut frame = frame_on(&mut heap);
        let sink = &mut std::io::sink();
        let object = builder_object(&mut heap);
        frame.push(object);
        builder_init(&mut heap, &mut frame, sink).expect("init");

        let text = heap.store_ascii(RefKind::Ascii, b"n = ").expect("text");
        frame.push(object);
        frame.push(text);
        builder_append_string(&mut heap, &mut frame, sink).expect("append");
        frame.push(Numero::new(-305).expect("in range"));
        builder_append_int(&mut heap, &mut frame, sink).expect("append");
        builder_to_string(&mut heap, &mut frame, sink).expect("to string");

        let result = frame.pop().expect("string");
        assert_eq!(heap.load_string(result).expect("ascii"), "n = -305");
        assert_eq!(frame.stack_len(), 0);
    }

    #[test]
    fn string_builder_grows_past_its_first_buffer() {
        let mut heap = Heap::default();
        let object = builder_object(&mut heap);
        let mut frame = frame_on(&mut heap);
        frame.push(object);
        builder_init(&mut heap, &mut frame, &mut std::io::sink()).expect("init");

        let chunk = [b'a'; 20];
        for _ in 0..3 {
            append(&mut heap, object, &chunk).expect("room up to 255");
        }
        let buffer = heap.row_load(object, BUFFER).expect("buffer");
        assert_eq!(heap.row_length(buffer), Ok(64));
        assert_eq!(
            append(&mut heap, object, &[b'b'; 200]),
            Err(RuntimeError::BlobLength { len: 260 })
        );
    }

    #[test]
    fn table_covers_every_descriptor() {
        let natives = default_natives();
        assert_eq!(natives.len(), 8);
        assert!(natives.iter().any(|n| n.descriptor == descriptors::BUILDER_TO_STRING));
    }
}
