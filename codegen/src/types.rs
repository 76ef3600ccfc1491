use crate::reflect::{BaseType, ScalarType, StructField};
use std::borrow::Cow;

const SV_POSITION: &str = "SV_Position";

// Row offsets, input slots and instance stepping aren't derived from the shader yet.
const SEMANTIC_INDEX: u32 = 0;
const INPUT_SLOT: u32 = 0;
const ALIGNED_BYTE_OFFSET: &str = "D3D12_APPEND_ALIGNED_ELEMENT";
const INPUT_SLOT_CLASS: &str = "D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA";
const INSTANCE_DATA_STEP_RATE: u32 = 0;

const CHANNEL_BITS: u32 = 32;

impl ScalarType {
    pub fn engine(&self) -> &'static str {
        match self {
            ScalarType::Int => "int32",
            ScalarType::Uint | ScalarType::Dword => "uint32",
            ScalarType::Half => "int16",
            ScalarType::Bool => "bool",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
        }
    }

    fn dxgi_type(&self) -> &'static str {
        match self {
            ScalarType::Float => "FLOAT",
            ScalarType::Int => "SINT",
            ScalarType::Uint | ScalarType::Dword => "UINT",
            _ => "TYPELESS",
        }
    }
}

impl BaseType {
    pub fn engine(&self) -> Cow<'_, str> {
        match self {
            BaseType::Scalar(scalar) => Cow::Borrowed(scalar.engine()),
            BaseType::Named(name) => Cow::Borrowed(name),
        }
    }
}

/// Engine-side member declaration, e.g. `Vec3 Position;` or `int32 counts[2][3];`.
pub fn engine_declaration(field: &StructField) -> String {
    debug_assert!((1..=4).contains(&field.columns) && (1..=4).contains(&field.rows));
    let is_float = field.base_type == BaseType::Scalar(ScalarType::Float);
    let mut typ = field.base_type.engine();
    let mut array_suffix = field.array_suffix.clone();
    if field.is_vector() {
        if is_float {
            typ = Cow::Owned(format!("Vec{}", field.columns));
        } else {
            array_suffix.push_str(&format!("[{}]", field.columns));
        }
    } else if field.is_matrix() {
        if is_float && field.columns == 4 && field.rows == 4 {
            typ = Cow::Borrowed("Mat4");
        } else {
            array_suffix.push_str(&format!("[{}][{}]", field.columns, field.rows));
        }
    }
    format!("{typ} {}{array_suffix};", field.name)
}

/// Vertex input format of a field, e.g. `DXGI_FORMAT_R32G32B32_FLOAT`. Matrices and the
/// rasterizer position have no input format.
pub fn dxgi_format(field: &StructField) -> Option<String> {
    if field.is_matrix() || field.semantic.as_deref() == Some(SV_POSITION) {
        return None;
    }
    let channels: String = ["R", "G", "B", "A"][..field.columns as usize]
        .iter()
        .map(|channel| format!("{channel}{CHANNEL_BITS}"))
        .collect();
    let typ = match &field.base_type {
        BaseType::Scalar(scalar) => scalar.dxgi_type(),
        BaseType::Named(_) => "TYPELESS",
    };
    Some(format!("DXGI_FORMAT_{channels}_{typ}"))
}

/// One `D3D12_INPUT_ELEMENT_DESC` initializer for a vertex layout field.
pub fn input_element_desc(field: &StructField) -> Option<String> {
    let format = dxgi_format(field)?;
    let semantic = field.semantic.as_deref().unwrap_or_default();
    Some(format!(
        "{{ \"{semantic}\", {SEMANTIC_INDEX}, {format}, {INPUT_SLOT}, {ALIGNED_BYTE_OFFSET}, {INPUT_SLOT_CLASS}, {INSTANCE_DATA_STEP_RATE} }},"
    ))
}

#[cfg(test)]
fn field(typ: &str, name: &str, array_suffix: &str) -> StructField {
    let (base_type, columns, rows) = crate::reflect::decompose_type(typ);
    StructField {
        interpolation: None,
        base_type,
        columns,
        rows,
        array_suffix: array_suffix.into(),
        name: name.into(),
        semantic: None,
    }
}

#[test]
fn scalars() {
    assert_eq!(engine_declaration(&field("int", "a", "")), "int32 a;");
    assert_eq!(engine_declaration(&field("dword", "b", "")), "uint32 b;");
    assert_eq!(engine_declaration(&field("uint", "c", "[2]")), "uint32 c[2];");
    assert_eq!(engine_declaration(&field("half", "d", "")), "int16 d;");
    assert_eq!(engine_declaration(&field("float", "e", "")), "float e;");
    assert_eq!(engine_declaration(&field("bool", "f", "")), "bool f;");
}

#[test]
fn vectors() {
    assert_eq!(engine_declaration(&field("float3", "p", "")), "Vec3 p;");
    assert_eq!(engine_declaration(&field("int3", "i", "")), "int32 i[3];");
    assert_eq!(engine_declaration(&field("uint2", "u", "[4]")), "uint32 u[4][2];");
}

#[test]
fn matrices() {
    assert_eq!(engine_declaration(&field("float4x4", "MVP", "")), "Mat4 MVP;");
    assert_eq!(engine_declaration(&field("float3x2", "m", "")), "float m[3][2];");
    assert_eq!(engine_declaration(&field("int4x4", "n", "")), "int32 n[4][4];");
}

#[test]
fn named_types_pass_through() {
    assert_eq!(engine_declaration(&field("TestX1234", "X", "")), "TestX1234 X;");
}

#[test]
fn formats() {
    assert_eq!(
        dxgi_format(&field("float3", "p", "")).as_deref(),
        Some("DXGI_FORMAT_R32G32B32_FLOAT")
    );
    assert_eq!(
        dxgi_format(&field("int", "i", "")).as_deref(),
        Some("DXGI_FORMAT_R32_SINT")
    );
    assert_eq!(
        dxgi_format(&field("dword4", "d", "")).as_deref(),
        Some("DXGI_FORMAT_R32G32B32A32_UINT")
    );
    assert_eq!(
        dxgi_format(&field("half2", "h", "")).as_deref(),
        Some("DXGI_FORMAT_R32G32_TYPELESS")
    );
    assert_eq!(dxgi_format(&field("float4x4", "m", "")), None);
}

#[test]
fn position_has_no_format() {
    let mut position = field("float4", "pos", "");
    position.semantic = Some("SV_Position".into());
    assert_eq!(dxgi_format(&position), None);
}

#[test]
fn input_element() {
    let mut uv = field("float2", "UV", "");
    uv.semantic = Some("TEXCOORD".into());
    assert_eq!(
        input_element_desc(&uv).as_deref(),
        Some("{ \"TEXCOORD\", 0, DXGI_FORMAT_R32G32_FLOAT, 0, D3D12_APPEND_ALIGNED_ELEMENT, D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA, 0 },")
    );
}
