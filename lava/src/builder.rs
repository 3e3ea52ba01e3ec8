use crate::{
    RuntimeError, VmResult,
    op::{Op, Operands},
};

/// A branch target inside one [`BytecodeBuilder`].
///
/// Branches may reference a label before it is bound; the offset is patched
/// when [`BytecodeBuilder::bind`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug)]
struct Patch {
    /// Position of the branch opcode, offsets are relative to it.
    at: usize,
    label: Label,
}

/// Assembles a method body.
#[derive(Debug, Default)]
pub struct BytecodeBuilder {
    buf: Vec<u8>,
    labels: Vec<Option<usize>>,
    patches: Vec<Patch>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    /// Resolve every branch and hand out the bytes.
    pub fn into_bytes(mut self) -> VmResult<Vec<u8>> {
        for patch in std::mem::take(&mut self.patches) {
            let target = self.labels[patch.label.0].ok_or(RuntimeError::InvalidJump { target: -1 })?;
            let offset = target as i64 - patch.at as i64;
            let offset = i16::try_from(offset).map_err(|_| RuntimeError::InvalidJump { target: target as i64 })?;
            self.buf[patch.at + 1..patch.at + 3].copy_from_slice(&offset.to_be_bytes());
        }
        Ok(self.buf)
    }

    fn emit_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn emit_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Emit an opcode without operands.
    pub fn op(&mut self, op: Op) -> &mut Self {
        self.buf.push(op as u8);
        self
    }

    /// Shortest encoding of an integer literal: `iconst_*`, `bipush` or
    /// `sipush`.
    pub fn push_int(&mut self, value: i16) -> &mut Self {
        const ICONST: [Op; 7] = [
            Op::IconstM1,
            Op::Iconst0,
            Op::Iconst1,
            Op::Iconst2,
            Op::Iconst3,
            Op::Iconst4,
            Op::Iconst5,
        ];
        if (-1..=5).contains(&value) {
            self.op(ICONST[(value + 1) as usize])
        } else if let Ok(byte) = i8::try_from(value) {
            self.op(Op::Bipush);
            self.emit_u8(byte as u8);
            self
        } else {
            self.op(Op::Sipush);
            self.emit_u16(value as u16);
            self
        }
    }

    pub fn ldc(&mut self, index: u8) -> &mut Self {
        self.op(Op::Ldc);
        self.emit_u8(index);
        self
    }

    fn local(&mut self, short: [Op; 4], long: Op, slot: u8) -> &mut Self {
        match short.get(slot as usize) {
            Some(&op) => self.op(op),
            None => {
                self.op(long);
                self.emit_u8(slot);
                self
            }
        }
    }

    pub fn iload(&mut self, slot: u8) -> &mut Self {
        self.local(
            [Op::Iload0, Op::Iload1, Op::Iload2, Op::Iload3],
            Op::Iload,
            slot,
        )
    }

    pub fn aload(&mut self, slot: u8) -> &mut Self {
        self.local(
            [Op::Aload0, Op::Aload1, Op::Aload2, Op::Aload3],
            Op::Aload,
            slot,
        )
    }

    pub fn istore(&mut self, slot: u8) -> &mut Self {
        self.local(
            [Op::Istore0, Op::Istore1, Op::Istore2, Op::Istore3],
            Op::Istore,
            slot,
        )
    }

    pub fn astore(&mut self, slot: u8) -> &mut Self {
        self.local(
            [Op::Astore0, Op::Astore1, Op::Astore2, Op::Astore3],
            Op::Astore,
            slot,
        )
    }

    pub fn iinc(&mut self, slot: u8, delta: i8) -> &mut Self {
        self.op(Op::Iinc);
        self.emit_u8(slot);
        self.emit_u8(delta as u8);
        self
    }

    /// Any opcode taking a 16 bit constant pool index.
    pub fn pool(&mut self, op: Op, index: u16) -> &mut Self {
        debug_assert_eq!(op.operands(), Operands::U16, "{op} takes no pool index");
        self.op(op);
        self.emit_u16(index);
        self
    }

    pub fn newarray(&mut self, atype: u8) -> &mut Self {
        self.op(Op::Newarray);
        self.emit_u8(atype);
        self
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the next emitted instruction.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.buf.len());
        self
    }

    /// Emit a branch opcode to `label`, bound or not.
    pub fn branch(&mut self, op: Op, label: Label) -> &mut Self {
        debug_assert_eq!(op.operands(), Operands::Branch, "{op} is not a branch");
        self.patches.push(Patch {
            at: self.buf.len(),
            label,
        });
        self.op(op);
        self.emit_u16(0);
        self
    }

    pub fn goto(&mut self, label: Label) -> &mut Self {
        self.branch(Op::Jmp, label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_pick_the_shortest_form() {
        let mut b = BytecodeBuilder::new();
        b.push_int(-1).push_int(5).push_int(6).push_int(-128).push_int(300);
        assert_eq!(
            b.into_bytes().expect("no labels"),
            [0x02, 0x08, 0x10, 6, 0x10, 0x80, 0x11, 0x01, 0x2c]
        );
    }

    #[test]
    fn locals_use_short_forms_up_to_three() {
        let mut b = BytecodeBuilder::new();
        b.iload(0).iload(3).iload(4).astore(2).astore(7).istore(1).aload(0);
        assert_eq!(
            b.into_bytes().expect("no labels"),
            [0x1a, 0x1d, 0x15, 4, 0x4d, 0x3a, 7, 0x3c, 0x2a]
        );
    }

    #[test]
    fn branch_offsets_are_relative_to_the_opcode() {
        let mut b = BytecodeBuilder::new();
        let top = b.label();
        let exit = b.label();
        b.bind(top);
        b.iload(0); // 0
        b.branch(Op::Ifeq, exit); // 1
        b.iinc(0, -1); // 4
        b.goto(top); // 7
        b.bind(exit);
        b.op(Op::ReturnV); // 10
        let bytes = b.into_bytes().expect("labels bound");
        assert_eq!(&bytes[1..4], &[0x99, 0x00, 0x09], "forward: 10 - 1");
        assert_eq!(&bytes[7..10], &[0xa7, 0xff, 0xf9], "backward: 0 - 7");
    }

    #[test]
    fn unbound_label_is_an_error() {
        let mut b = BytecodeBuilder::new();
        let nowhere = b.label();
        b.goto(nowhere);
        assert!(b.into_bytes().is_err());
    }
}
