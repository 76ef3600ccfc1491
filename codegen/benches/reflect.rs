use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::fmt::Write;
use std::path::Path;

fn shader_source(structs: usize) -> String {
    let mut text = String::from("// ShaderCompiler. Name: Lighting, Type: PS, Defines: USE_FOG; USE_SHADOWS\n");
    for index in 0..structs {
        writeln!(
            text,
            r"// Per-draw data {index}.
struct Constants{index}
{{
    float4x4 world;
    float3 tint; // padded
    uint flags[4];
}};

struct VertexInput{index}
{{
    float3 position : POSITION;
    nointerpolation uint material : MATERIAL;
    float2 uv : TEXCOORD;
}};

struct PixelInput{index}
{{
    float4 position : SV_Position;
    float2 uv : TEXCOORD;
}};
"
        )
        .unwrap();
    }
    text
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("shader reflection");
    let source = shader_source(64);
    group.bench_function("structs", |b| {
        b.iter(|| codegen::reflect_structs(black_box(&source), Path::new("bench.hlsl")).unwrap())
    });
    group.bench_function("directives", |b| {
        b.iter(|| codegen::parse_directives(black_box(&source), Path::new("bench.hlsl")).unwrap())
    });
    group.bench_function("declarations", |b| {
        let structs = codegen::reflect_structs(&source, Path::new("bench.hlsl")).unwrap();
        b.iter(|| {
            for shader_struct in &structs {
                for field in &shader_struct.fields {
                    black_box(codegen::engine_declaration(black_box(field)));
                    black_box(codegen::input_element_desc(black_box(field)));
                }
            }
        })
    });
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
