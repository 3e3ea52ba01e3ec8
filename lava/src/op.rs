use std::fmt;

/// Shape of the bytes following an opcode. Multi-byte operands are
/// big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    /// Unsigned byte: local slot, `ldc` pool index or array type.
    U8,
    /// Sign-extended immediate byte.
    I8,
    /// Sign-extended immediate short.
    I16,
    /// Constant pool index.
    U16,
    /// Branch offset, relative to the branch opcode.
    Branch,
    /// `index:u8`, `delta:i8`.
    Iinc,
}

impl Operands {
    pub const fn width(self) -> usize {
        match self {
            Operands::None => 0,
            Operands::U8 | Operands::I8 => 1,
            Operands::I16 | Operands::U16 | Operands::Branch | Operands::Iinc => 2,
        }
    }
}

macro_rules! opcodes {
    ($( $(#[$meta:meta])* $name:ident = $byte:literal, $mnemonic:literal, $operands:ident; )*) => {
        /// Supported opcodes. Byte values are the ones of the standard
        /// class-file instruction set.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Op {
            $( $(#[$meta])* $name = $byte, )*
        }

        impl Op {
            pub const ALL: &'static [Op] = &[$(Op::$name),*];

            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(Op::$name => $mnemonic,)*
                }
            }

            pub const fn operands(self) -> Operands {
                match self {
                    $(Op::$name => Operands::$operands,)*
                }
            }
        }

        impl TryFrom<u8> for Op {
            type Error = u8;

            fn try_from(byte: u8) -> Result<Self, u8> {
                match byte {
                    $($byte => Ok(Op::$name),)*
                    _ => Err(byte),
                }
            }
        }
    };
}

opcodes! {
    IconstM1 = 0x02, "iconst_m1", None;
    Iconst0 = 0x03, "iconst_0", None;
    Iconst1 = 0x04, "iconst_1", None;
    Iconst2 = 0x05, "iconst_2", None;
    Iconst3 = 0x06, "iconst_3", None;
    Iconst4 = 0x07, "iconst_4", None;
    Iconst5 = 0x08, "iconst_5", None;
    Bipush = 0x10, "bipush", I8;
    Sipush = 0x11, "sipush", I16;
    /// Push a constant pool entry.
    Ldc = 0x12, "ldc", U8;
    Iload = 0x15, "iload", U8;
    Aload = 0x19, "aload", U8;
    Iload0 = 0x1a, "iload_0", None;
    Iload1 = 0x1b, "iload_1", None;
    Iload2 = 0x1c, "iload_2", None;
    Iload3 = 0x1d, "iload_3", None;
    /// Reads the entry argument array in the entry method, fatal when empty.
    Aload0 = 0x2a, "aload_0", None;
    Aload1 = 0x2b, "aload_1", None;
    Aload2 = 0x2c, "aload_2", None;
    Aload3 = 0x2d, "aload_3", None;
    Iaload = 0x2e, "iaload", None;
    Aaload = 0x32, "aaload", None;
    Istore = 0x36, "istore", U8;
    Astore = 0x3a, "astore", U8;
    Istore0 = 0x3b, "istore_0", None;
    Istore1 = 0x3c, "istore_1", None;
    Istore2 = 0x3d, "istore_2", None;
    Istore3 = 0x3e, "istore_3", None;
    Astore0 = 0x4b, "astore_0", None;
    Astore1 = 0x4c, "astore_1", None;
    Astore2 = 0x4d, "astore_2", None;
    Astore3 = 0x4e, "astore_3", None;
    Iastore = 0x4f, "iastore", None;
    Aastore = 0x53, "aastore", None;
    Pop = 0x57, "pop", None;
    Dup = 0x59, "dup", None;
    Iadd = 0x60, "iadd", None;
    Isub = 0x64, "isub", None;
    Imul = 0x68, "imul", None;
    Idiv = 0x6c, "idiv", None;
    Irem = 0x70, "irem", None;
    Ineg = 0x74, "ineg", None;
    Iinc = 0x84, "iinc", Iinc;
    Ifeq = 0x99, "ifeq", Branch;
    Ifne = 0x9a, "ifne", Branch;
    Iflt = 0x9b, "iflt", Branch;
    Ifge = 0x9c, "ifge", Branch;
    Ifgt = 0x9d, "ifgt", Branch;
    Ifle = 0x9e, "ifle", Branch;
    IfIcmpeq = 0x9f, "if_icmpeq", Branch;
    IfIcmpne = 0xa0, "if_icmpne", Branch;
    IfIcmplt = 0xa1, "if_icmplt", Branch;
    IfIcmpge = 0xa2, "if_icmpge", Branch;
    IfIcmpgt = 0xa3, "if_icmpgt", Branch;
    IfIcmple = 0xa4, "if_icmple", Branch;
    Jmp = 0xa7, "goto", Branch;
    Ireturn = 0xac, "ireturn", None;
    Areturn = 0xb0, "areturn", None;
    /// Void return, halts the engine from the outermost frame.
    ReturnV = 0xb1, "return", None;
    Getstatic = 0xb2, "getstatic", U16;
    Putstatic = 0xb3, "putstatic", U16;
    Getfield = 0xb4, "getfield", U16;
    Putfield = 0xb5, "putfield", U16;
    Invokevirtual = 0xb6, "invokevirtual", U16;
    Invokespecial = 0xb7, "invokespecial", U16;
    Invokestatic = 0xb8, "invokestatic", U16;
    NewObj = 0xbb, "new", U16;
    Newarray = 0xbc, "newarray", U8;
    Anewarray = 0xbd, "anewarray", U16;
    Arraylength = 0xbe, "arraylength", None;
    Checkcast = 0xc0, "checkcast", U16;
    Ifnull = 0xc6, "ifnull", Branch;
}

impl Op {
    /// Total encoded size, opcode included.
    pub const fn size(self) -> usize {
        1 + self.operands().width()
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Renders a method body one instruction per line as
/// `offset: mnemonic operands`.
pub struct Disassembly<'a>(pub &'a [u8]);

impl fmt::Display for Disassembly<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.0;
        let mut pos = 0;
        while pos < code.len() {
            let byte = code[pos];
            let Ok(op) = Op::try_from(byte) else {
                writeln!(f, "{pos:4}: .byte {byte} (0x{byte:02x})")?;
                pos += 1;
                continue;
            };
            let Some(operands) = code.get(pos + 1..pos + op.size()) else {
                writeln!(f, "{pos:4}: {op} <truncated>")?;
                break;
            };
            write!(f, "{pos:4}: {op}")?;
            match op.operands() {
                Operands::None => {}
                Operands::U8 => write!(f, " {}", operands[0])?,
                Operands::I8 => write!(f, " {}", operands[0] as i8)?,
                Operands::I16 => write!(f, " {}", i16::from_be_bytes([operands[0], operands[1]]))?,
                Operands::U16 => write!(f, " #{}", u16::from_be_bytes([operands[0], operands[1]]))?,
                Operands::Branch => {
                    let offset = i16::from_be_bytes([operands[0], operands[1]]);
                    write!(f, " {offset:+} (-> {})", pos as isize + offset as isize)?;
                }
                Operands::Iinc => write!(f, " {} {}", operands[0], operands[1] as i8)?,
            }
            writeln!(f)?;
            pos += op.size();
        }
        Ok(())
    }
}
