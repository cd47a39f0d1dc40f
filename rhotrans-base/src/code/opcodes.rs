//! The JVM opcodes, with their length and the effect they have on the operand stack.
//!
//! The stack effect is written as the types popped, a `:`, then the types pushed.
//! `I`, `F`, `O` and `W` (any single word) take one slot, `L` and `D` take one or two slots
//! depending on the word size. A `*` clears the stack, which is used by instructions that never
//! fall through. A `?` means the effect depends on the operands.
//! A length of zero means the instruction has a variable length.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub name: &'static str,
    pub length: u8,
    pub effect: &'static str,
}
impl OpcodeInfo {
    #[must_use]
    pub fn is_variable_length(&self) -> bool {
        self.length == 0
    }

    #[must_use]
    pub fn has_computed_effect(&self) -> bool {
        self.effect == "?"
    }
}

macro_rules! define_opcodes {
    ($($konst:ident $name:literal = $opcode:literal, $length:literal, $effect:literal;)*) => {
        $(
            pub const $konst: u8 = $opcode;
        )*

        /// Get the information for an opcode, `None` if it is not a JVM opcode
        #[must_use]
        pub fn info(opcode: u8) -> Option<OpcodeInfo> {
            match opcode {
                $(
                    $opcode => Some(OpcodeInfo {
                        name: $name,
                        length: $length,
                        effect: $effect,
                    }),
                )*
                _ => None,
            }
        }
    };
}

define_opcodes! {
    NOP "nop" = 0x00, 1, "";
    ACONST_NULL "aconst_null" = 0x01, 1, ":O";
    ICONST_M1 "iconst_m1" = 0x02, 1, ":I";
    ICONST_0 "iconst_0" = 0x03, 1, ":I";
    ICONST_1 "iconst_1" = 0x04, 1, ":I";
    ICONST_2 "iconst_2" = 0x05, 1, ":I";
    ICONST_3 "iconst_3" = 0x06, 1, ":I";
    ICONST_4 "iconst_4" = 0x07, 1, ":I";
    ICONST_5 "iconst_5" = 0x08, 1, ":I";
    LCONST_0 "lconst_0" = 0x09, 1, ":L";
    LCONST_1 "lconst_1" = 0x0a, 1, ":L";
    FCONST_0 "fconst_0" = 0x0b, 1, ":F";
    FCONST_1 "fconst_1" = 0x0c, 1, ":F";
    FCONST_2 "fconst_2" = 0x0d, 1, ":F";
    DCONST_0 "dconst_0" = 0x0e, 1, ":D";
    DCONST_1 "dconst_1" = 0x0f, 1, ":D";
    BIPUSH "bipush" = 0x10, 2, ":I";
    SIPUSH "sipush" = 0x11, 3, ":I";
    LDC "ldc" = 0x12, 2, "?";
    LDC_W "ldc_w" = 0x13, 3, "?";
    LDC2_W "ldc2_w" = 0x14, 3, "?";
    ILOAD "iload" = 0x15, 2, ":I";
    LLOAD "lload" = 0x16, 2, ":L";
    FLOAD "fload" = 0x17, 2, ":F";
    DLOAD "dload" = 0x18, 2, ":D";
    ALOAD "aload" = 0x19, 2, ":O";
    ILOAD_0 "iload_0" = 0x1a, 1, ":I";
    ILOAD_1 "iload_1" = 0x1b, 1, ":I";
    ILOAD_2 "iload_2" = 0x1c, 1, ":I";
    ILOAD_3 "iload_3" = 0x1d, 1, ":I";
    LLOAD_0 "lload_0" = 0x1e, 1, ":L";
    LLOAD_1 "lload_1" = 0x1f, 1, ":L";
    LLOAD_2 "lload_2" = 0x20, 1, ":L";
    LLOAD_3 "lload_3" = 0x21, 1, ":L";
    FLOAD_0 "fload_0" = 0x22, 1, ":F";
    FLOAD_1 "fload_1" = 0x23, 1, ":F";
    FLOAD_2 "fload_2" = 0x24, 1, ":F";
    FLOAD_3 "fload_3" = 0x25, 1, ":F";
    DLOAD_0 "dload_0" = 0x26, 1, ":D";
    DLOAD_1 "dload_1" = 0x27, 1, ":D";
    DLOAD_2 "dload_2" = 0x28, 1, ":D";
    DLOAD_3 "dload_3" = 0x29, 1, ":D";
    ALOAD_0 "aload_0" = 0x2a, 1, ":O";
    ALOAD_1 "aload_1" = 0x2b, 1, ":O";
    ALOAD_2 "aload_2" = 0x2c, 1, ":O";
    ALOAD_3 "aload_3" = 0x2d, 1, ":O";
    IALOAD "iaload" = 0x2e, 1, "OI:I";
    LALOAD "laload" = 0x2f, 1, "OI:L";
    FALOAD "faload" = 0x30, 1, "OI:F";
    DALOAD "daload" = 0x31, 1, "OI:D";
    AALOAD "aaload" = 0x32, 1, "OI:O";
    BALOAD "baload" = 0x33, 1, "OI:I";
    CALOAD "caload" = 0x34, 1, "OI:I";
    SALOAD "saload" = 0x35, 1, "OI:I";
    ISTORE "istore" = 0x36, 2, "I:";
    LSTORE "lstore" = 0x37, 2, "L:";
    FSTORE "fstore" = 0x38, 2, "F:";
    DSTORE "dstore" = 0x39, 2, "D:";
    ASTORE "astore" = 0x3a, 2, "O:";
    ISTORE_0 "istore_0" = 0x3b, 1, "I:";
    ISTORE_1 "istore_1" = 0x3c, 1, "I:";
    ISTORE_2 "istore_2" = 0x3d, 1, "I:";
    ISTORE_3 "istore_3" = 0x3e, 1, "I:";
    LSTORE_0 "lstore_0" = 0x3f, 1, "L:";
    LSTORE_1 "lstore_1" = 0x40, 1, "L:";
    LSTORE_2 "lstore_2" = 0x41, 1, "L:";
    LSTORE_3 "lstore_3" = 0x42, 1, "L:";
    FSTORE_0 "fstore_0" = 0x43, 1, "F:";
    FSTORE_1 "fstore_1" = 0x44, 1, "F:";
    FSTORE_2 "fstore_2" = 0x45, 1, "F:";
    FSTORE_3 "fstore_3" = 0x46, 1, "F:";
    DSTORE_0 "dstore_0" = 0x47, 1, "D:";
    DSTORE_1 "dstore_1" = 0x48, 1, "D:";
    DSTORE_2 "dstore_2" = 0x49, 1, "D:";
    DSTORE_3 "dstore_3" = 0x4a, 1, "D:";
    ASTORE_0 "astore_0" = 0x4b, 1, "O:";
    ASTORE_1 "astore_1" = 0x4c, 1, "O:";
    ASTORE_2 "astore_2" = 0x4d, 1, "O:";
    ASTORE_3 "astore_3" = 0x4e, 1, "O:";
    IASTORE "iastore" = 0x4f, 1, "OII:";
    LASTORE "lastore" = 0x50, 1, "OIL:";
    FASTORE "fastore" = 0x51, 1, "OIF:";
    DASTORE "dastore" = 0x52, 1, "OID:";
    AASTORE "aastore" = 0x53, 1, "OIO:";
    BASTORE "bastore" = 0x54, 1, "OII:";
    CASTORE "castore" = 0x55, 1, "OII:";
    SASTORE "sastore" = 0x56, 1, "OII:";
    POP "pop" = 0x57, 1, "W:";
    POP2 "pop2" = 0x58, 1, "WW:";
    DUP "dup" = 0x59, 1, "W:WW";
    DUP_X1 "dup_x1" = 0x5a, 1, "WW:WWW";
    DUP_X2 "dup_x2" = 0x5b, 1, "WWW:WWWW";
    DUP2 "dup2" = 0x5c, 1, "WW:WWWW";
    DUP2_X1 "dup2_x1" = 0x5d, 1, "WWW:WWWWW";
    DUP2_X2 "dup2_x2" = 0x5e, 1, "WWWW:WWWWWW";
    SWAP "swap" = 0x5f, 1, "WW:WW";
    IADD "iadd" = 0x60, 1, "II:I";
    LADD "ladd" = 0x61, 1, "LL:L";
    FADD "fadd" = 0x62, 1, "FF:F";
    DADD "dadd" = 0x63, 1, "DD:D";
    ISUB "isub" = 0x64, 1, "II:I";
    LSUB "lsub" = 0x65, 1, "LL:L";
    FSUB "fsub" = 0x66, 1, "FF:F";
    DSUB "dsub" = 0x67, 1, "DD:D";
    IMUL "imul" = 0x68, 1, "II:I";
    LMUL "lmul" = 0x69, 1, "LL:L";
    FMUL "fmul" = 0x6a, 1, "FF:F";
    DMUL "dmul" = 0x6b, 1, "DD:D";
    IDIV "idiv" = 0x6c, 1, "II:I";
    LDIV "ldiv" = 0x6d, 1, "LL:L";
    FDIV "fdiv" = 0x6e, 1, "FF:F";
    DDIV "ddiv" = 0x6f, 1, "DD:D";
    IREM "irem" = 0x70, 1, "II:I";
    LREM "lrem" = 0x71, 1, "LL:L";
    FREM "frem" = 0x72, 1, "FF:F";
    DREM "drem" = 0x73, 1, "DD:D";
    INEG "ineg" = 0x74, 1, "I:I";
    LNEG "lneg" = 0x75, 1, "L:L";
    FNEG "fneg" = 0x76, 1, "F:F";
    DNEG "dneg" = 0x77, 1, "D:D";
    ISHL "ishl" = 0x78, 1, "II:I";
    LSHL "lshl" = 0x79, 1, "LI:L";
    ISHR "ishr" = 0x7a, 1, "II:I";
    LSHR "lshr" = 0x7b, 1, "LI:L";
    IUSHR "iushr" = 0x7c, 1, "II:I";
    LUSHR "lushr" = 0x7d, 1, "LI:L";
    IAND "iand" = 0x7e, 1, "II:I";
    LAND "land" = 0x7f, 1, "LL:L";
    IOR "ior" = 0x80, 1, "II:I";
    LOR "lor" = 0x81, 1, "LL:L";
    IXOR "ixor" = 0x82, 1, "II:I";
    LXOR "lxor" = 0x83, 1, "LL:L";
    IINC "iinc" = 0x84, 3, "";
    I2L "i2l" = 0x85, 1, "I:L";
    I2F "i2f" = 0x86, 1, "I:F";
    I2D "i2d" = 0x87, 1, "I:D";
    L2I "l2i" = 0x88, 1, "L:I";
    L2F "l2f" = 0x89, 1, "L:F";
    L2D "l2d" = 0x8a, 1, "L:D";
    F2I "f2i" = 0x8b, 1, "F:I";
    F2L "f2l" = 0x8c, 1, "F:L";
    F2D "f2d" = 0x8d, 1, "F:D";
    D2I "d2i" = 0x8e, 1, "D:I";
    D2L "d2l" = 0x8f, 1, "D:L";
    D2F "d2f" = 0x90, 1, "D:F";
    I2B "i2b" = 0x91, 1, "I:I";
    I2C "i2c" = 0x92, 1, "I:I";
    I2S "i2s" = 0x93, 1, "I:I";
    LCMP "lcmp" = 0x94, 1, "LL:I";
    FCMPL "fcmpl" = 0x95, 1, "FF:I";
    FCMPG "fcmpg" = 0x96, 1, "FF:I";
    DCMPL "dcmpl" = 0x97, 1, "DD:I";
    DCMPG "dcmpg" = 0x98, 1, "DD:I";
    IFEQ "ifeq" = 0x99, 3, "I:";
    IFNE "ifne" = 0x9a, 3, "I:";
    IFLT "iflt" = 0x9b, 3, "I:";
    IFGE "ifge" = 0x9c, 3, "I:";
    IFGT "ifgt" = 0x9d, 3, "I:";
    IFLE "ifle" = 0x9e, 3, "I:";
    IF_ICMPEQ "if_icmpeq" = 0x9f, 3, "II:";
    IF_ICMPNE "if_icmpne" = 0xa0, 3, "II:";
    IF_ICMPLT "if_icmplt" = 0xa1, 3, "II:";
    IF_ICMPGE "if_icmpge" = 0xa2, 3, "II:";
    IF_ICMPGT "if_icmpgt" = 0xa3, 3, "II:";
    IF_ICMPLE "if_icmple" = 0xa4, 3, "II:";
    IF_ACMPEQ "if_acmpeq" = 0xa5, 3, "OO:";
    IF_ACMPNE "if_acmpne" = 0xa6, 3, "OO:";
    GOTO "goto" = 0xa7, 3, "*";
    JSR "jsr" = 0xa8, 3, ":W";
    RET "ret" = 0xa9, 2, "*";
    TABLESWITCH "tableswitch" = 0xaa, 0, "I:*";
    LOOKUPSWITCH "lookupswitch" = 0xab, 0, "I:*";
    IRETURN "ireturn" = 0xac, 1, "I:*";
    LRETURN "lreturn" = 0xad, 1, "L:*";
    FRETURN "freturn" = 0xae, 1, "F:*";
    DRETURN "dreturn" = 0xaf, 1, "D:*";
    ARETURN "areturn" = 0xb0, 1, "O:*";
    RETURN "return" = 0xb1, 1, "*";
    GETSTATIC "getstatic" = 0xb2, 3, "?";
    PUTSTATIC "putstatic" = 0xb3, 3, "?";
    GETFIELD "getfield" = 0xb4, 3, "?";
    PUTFIELD "putfield" = 0xb5, 3, "?";
    INVOKEVIRTUAL "invokevirtual" = 0xb6, 3, "?";
    INVOKESPECIAL "invokespecial" = 0xb7, 3, "?";
    INVOKESTATIC "invokestatic" = 0xb8, 3, "?";
    INVOKEINTERFACE "invokeinterface" = 0xb9, 5, "?";
    INVOKEDYNAMIC "invokedynamic" = 0xba, 5, "?";
    NEW "new" = 0xbb, 3, ":O";
    NEWARRAY "newarray" = 0xbc, 2, "I:O";
    ANEWARRAY "anewarray" = 0xbd, 3, "I:O";
    ARRAYLENGTH "arraylength" = 0xbe, 1, "O:I";
    ATHROW "athrow" = 0xbf, 1, "O:*";
    CHECKCAST "checkcast" = 0xc0, 3, "O:O";
    INSTANCEOF "instanceof" = 0xc1, 3, "O:I";
    MONITORENTER "monitorenter" = 0xc2, 1, "O:";
    MONITOREXIT "monitorexit" = 0xc3, 1, "O:";
    WIDE "wide" = 0xc4, 0, "?";
    MULTIANEWARRAY "multianewarray" = 0xc5, 4, "?";
    IFNULL "ifnull" = 0xc6, 3, "O:";
    IFNONNULL "ifnonnull" = 0xc7, 3, "O:";
    GOTO_W "goto_w" = 0xc8, 5, "*";
    JSR_W "jsr_w" = 0xc9, 5, ":W";
}

/// The name of an opcode, for listings
#[must_use]
pub fn name(opcode: u8) -> &'static str {
    info(opcode).map_or("<unknown>", |info| info.name)
}

/// Whether the opcode may follow a `wide` prefix
#[must_use]
pub fn is_widenable(opcode: u8) -> bool {
    matches!(opcode, ILOAD..=ALOAD | ISTORE..=ASTORE | IINC | RET)
}
