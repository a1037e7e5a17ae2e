use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The runtime primitive table, dispatched by the `SpecialCall` opcode.
///
/// The discriminants are the wire indices the tree builder stores at
/// compile time; the order is part of the compiled-program contract.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Primitive {
    /// Pointer equality on cells.
    ObjectEquals = 0,
    StringCompare = 1,
    StringPrint = 2,
    /// Allocates a fresh string cell.
    StringConcat = 3,
    IntegerEquals = 4,
    IntegerPlus = 5,
    IntegerMinus = 6,
    IntegerTimes = 7,
    /// Division by zero is not checked; the host outcome stands.
    IntegerDivide = 8,
    IntegerAsString = 9,
    IntegerLess = 10,
    IntegerOr = 11,
    IntegerAnd = 12,
    IntegerNot = 13,
    IntegerAsReal = 14,
    /// Allocates a raw cell of the given size and fills its slots from
    /// the remaining arguments.
    ObjectAllocate = 15,
    ObjectAt = 16,
    ObjectAtPut = 17,
    /// Evaluates its argument unchanged; exists for the type system.
    ObjectCast = 18,
    StringLength = 19,
    StringSubstring = 20,
    /// Reads one line; nil at end of input.
    StdinRead = 21,
    ObjectDefined = 22,
    RealAsString = 23,
    RealPlus = 24,
    RealMinus = 25,
    RealTimes = 26,
    RealDivide = 27,
    RealLess = 28,
    RealAsInteger = 29,
    /// Single-precision comparison.
    RealEquals = 30,
}

impl Primitive {
    /// The source-level name a primitive declaration binds to.
    #[must_use]
    pub fn name(self) -> &'static str {
        NAMES[u8::from(self) as usize]
    }

    /// Looks a declaration name up in the table.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Primitive> {
        let index = NAMES.iter().position(|&n| n == name)?;
        Primitive::try_from(index as u8).ok()
    }
}

const NAMES: [&str; 31] = [
    "Leda_object_equals",
    "Leda_string_compare",
    "Leda_string_print",
    "Leda_string_concat",
    "Leda_integer_equals",
    "Leda_integer_plus",
    "Leda_integer_minus",
    "Leda_integer_times",
    "Leda_integer_divide",
    "Leda_integer_asString",
    "Leda_integer_less",
    "Leda_integer_or",
    "Leda_integer_and",
    "Leda_integer_not",
    "Leda_integer_asReal",
    "Leda_object_allocate",
    "Leda_object_at",
    "Leda_object_atPut",
    "Leda_object_cast",
    "Leda_string_length",
    "Leda_string_substring",
    "Leda_stdin_read",
    "Leda_object_defined",
    "Leda_real_asString",
    "Leda_real_plus",
    "Leda_real_minus",
    "Leda_real_times",
    "Leda_real_divide",
    "Leda_real_less",
    "Leda_real_asInteger",
    "Leda_real_equals",
];

#[test]
fn test_table_round_trip() {
    for i in 0..NAMES.len() {
        let p = Primitive::try_from(i as u8).unwrap();
        assert_eq!(Some(p), Primitive::from_name(p.name()));
        assert_eq!(i as u8, u8::from(p));
    }
    assert!(Primitive::try_from(31u8).is_err());
    assert_eq!(None, Primitive::from_name("Leda_object_unknown"));
}

#[test]
fn test_wire_indices() {
    assert_eq!(0, u8::from(Primitive::ObjectEquals));
    assert_eq!(15, u8::from(Primitive::ObjectAllocate));
    assert_eq!(21, u8::from(Primitive::StdinRead));
    assert_eq!(30, u8::from(Primitive::RealEquals));
}
