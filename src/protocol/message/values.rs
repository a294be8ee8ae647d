//! Structures that may appear nested inside parameter and record values.
use crate::{
    packstream::{PackError, Packer, Structure, Unpacker, Value},
    protocol::registry::StructRule,
};

#[derive(Clone, Copy)]
enum Kind {
    Integer,
    Float,
    String,
}

fn read_typed(
    u: &mut Unpacker<'_>,
    tag: u8,
    name: &'static str,
    kinds: &[Kind],
) -> Result<Value, PackError> {
    let mut fields = Vec::with_capacity(kinds.len());
    for (i, kind) in kinds.iter().enumerate() {
        let value = u.unpack()?;
        let ok = match kind {
            Kind::Integer => matches!(value, Value::Integer(_)),
            Kind::Float => matches!(value, Value::Float(_)),
            Kind::String => matches!(value, Value::String(_)),
        };
        if !ok {
            return Err(PackError::illegal(
                name,
                &i.to_string(),
                format!("unexpected {}", value.type_name()),
            ));
        }
        fields.push(value);
    }
    Ok(Value::Struct(Structure::new(tag, fields)))
}

fn write_value(v: &Value, p: &mut Packer) -> Result<(), PackError> {
    p.pack(v)
}

macro_rules! value_struct {
    ($rule:ident, $reader:ident, $tag:expr, $name:literal, [$($kind:ident),+]) => {
        fn $reader(u: &mut Unpacker<'_>) -> Result<Value, PackError> {
            read_typed(u, $tag, $name, &[$(Kind::$kind),+])
        }

        pub const $rule: StructRule<Value> = StructRule {
            tag: $tag,
            name: $name,
            fields: [$(Kind::$kind),+].len(),
            read: $reader,
            write: write_value,
        };
    };
}

value_struct!(DATE, read_date, 0x44, "Date", [Integer]);
value_struct!(TIME, read_time, 0x54, "Time", [Integer, Integer]);
value_struct!(LOCAL_TIME, read_local_time, 0x74, "LocalTime", [Integer]);
value_struct!(DATE_TIME, read_date_time, 0x49, "DateTime", [Integer, Integer, Integer]);
value_struct!(
    DATE_TIME_ZONE_ID,
    read_date_time_zone_id,
    0x69,
    "DateTimeZoneId",
    [Integer, Integer, String]
);
value_struct!(LOCAL_DATE_TIME, read_local_date_time, 0x64, "LocalDateTime", [Integer, Integer]);
value_struct!(DURATION, read_duration, 0x45, "Duration", [Integer, Integer, Integer, Integer]);
value_struct!(POINT_2D, read_point_2d, 0x58, "Point2D", [Integer, Float, Float]);
value_struct!(POINT_3D, read_point_3d, 0x59, "Point3D", [Integer, Float, Float, Float]);

pub const ALL: [StructRule<Value>; 9] = [
    DATE,
    TIME,
    LOCAL_TIME,
    DATE_TIME,
    DATE_TIME_ZONE_ID,
    LOCAL_DATE_TIME,
    DURATION,
    POINT_2D,
    POINT_3D,
];
