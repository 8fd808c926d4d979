//! Engine descriptors expressed as wgpu types.

use rhi::{
    Extent3d, Format, IndexFormat, LoadOp, MemoryType, Offset3d, RhiError, RhiResult, StoreOp,
    TextureDesc, TextureKind,
};
use wgpu::{
    BufferUsages, Color, Features, Origin3d, TextureAspect, TextureDimension, TextureFormat,
    TextureUsages,
};

/// Row alignment `copy_buffer_to_texture` and `copy_texture_to_buffer` require.
pub const ROW_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// # Errors
/// [`RhiError::InvalidArgument`] when the format needs a feature the device lacks.
pub fn texture_format(format: Format, features: Features) -> RhiResult<TextureFormat> {
    Ok(match format {
        Format::Rgba8Unorm => TextureFormat::Rgba8Unorm,
        Format::Bgra8Unorm => TextureFormat::Bgra8Unorm,
        Format::R8Unorm => TextureFormat::R8Unorm,
        Format::R16Float => TextureFormat::R16Float,
        Format::Rgba16Float => TextureFormat::Rgba16Float,
        Format::R32Float => TextureFormat::R32Float,
        Format::R32Uint => TextureFormat::R32Uint,
        Format::Rg32Float => TextureFormat::Rg32Float,
        Format::Rgba32Float => TextureFormat::Rgba32Float,
        Format::Rgba32Uint => TextureFormat::Rgba32Uint,
        Format::D16Unorm => TextureFormat::Depth16Unorm,
        Format::D24UnormS8Uint => TextureFormat::Depth24PlusStencil8,
        Format::D32Float => TextureFormat::Depth32Float,
        Format::D32FloatS8Uint if features.contains(Features::DEPTH32FLOAT_STENCIL8) => {
            TextureFormat::Depth32FloatStencil8
        }
        Format::D32FloatS8Uint => {
            return Err(RhiError::InvalidArgument(
                "D32FloatS8Uint needs the DEPTH32FLOAT_STENCIL8 feature".into(),
            ));
        }
    })
}

pub const fn texture_dimension(kind: TextureKind) -> TextureDimension {
    match kind {
        TextureKind::Texture1D => TextureDimension::D1,
        TextureKind::Texture2D | TextureKind::TextureCube => TextureDimension::D2,
        TextureKind::Texture3D => TextureDimension::D3,
    }
}

/// Size with array layers folded into the depth axis, the way wgpu describes textures.
pub fn texture_size(desc: &TextureDesc) -> wgpu::Extent3d {
    let depth_or_array_layers = match desc.kind {
        TextureKind::Texture3D => desc.size.depth,
        TextureKind::Texture1D | TextureKind::Texture2D | TextureKind::TextureCube => desc.layer_count(),
    };
    wgpu::Extent3d {
        width: desc.size.width.max(1),
        height: desc.size.height.max(1),
        depth_or_array_layers: depth_or_array_layers.max(1),
    }
}

/// Every usage the engine may put a buffer to, restricted by the heap it lives in.
pub fn buffer_usages(memory_type: MemoryType) -> BufferUsages {
    match memory_type {
        MemoryType::Upload => BufferUsages::MAP_WRITE | BufferUsages::COPY_SRC,
        MemoryType::ReadBack => BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        MemoryType::DeviceLocal => {
            BufferUsages::COPY_SRC
                | BufferUsages::COPY_DST
                | BufferUsages::VERTEX
                | BufferUsages::INDEX
                | BufferUsages::UNIFORM
                | BufferUsages::STORAGE
                | BufferUsages::INDIRECT
                | BufferUsages::QUERY_RESOLVE
        }
    }
}

/// Every usage the format allows. Multisampled textures cannot be storage bound.
pub fn texture_usages(format: TextureFormat, sample_count: u32, features: Features) -> TextureUsages {
    let wanted = TextureUsages::COPY_SRC
        | TextureUsages::COPY_DST
        | TextureUsages::TEXTURE_BINDING
        | TextureUsages::RENDER_ATTACHMENT
        | TextureUsages::STORAGE_BINDING;
    let mut usages = wanted & format.guaranteed_format_features(features).allowed_usages;
    if sample_count > 1 {
        usages.remove(TextureUsages::STORAGE_BINDING);
    }
    usages
}

pub const fn index_format(format: IndexFormat) -> wgpu::IndexFormat {
    match format {
        IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
        IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
    }
}

/// wgpu has no "don't care" load, so those attachments are cleared instead.
pub const fn load_op<V: Copy>(op: LoadOp, clear: V) -> wgpu::LoadOp<V> {
    match op {
        LoadOp::Load => wgpu::LoadOp::Load,
        LoadOp::Clear | LoadOp::DontCare => wgpu::LoadOp::Clear(clear),
    }
}

pub const fn store_op(op: StoreOp) -> wgpu::StoreOp {
    match op {
        StoreOp::Store => wgpu::StoreOp::Store,
        StoreOp::DontCare => wgpu::StoreOp::Discard,
    }
}

pub fn color(value: [f32; 4]) -> Color {
    Color {
        r: f64::from(value[0]),
        g: f64::from(value[1]),
        b: f64::from(value[2]),
        a: f64::from(value[3]),
    }
}

pub fn uint_color(value: [u32; 4]) -> Color {
    Color {
        r: f64::from(value[0]),
        g: f64::from(value[1]),
        b: f64::from(value[2]),
        a: f64::from(value[3]),
    }
}

pub const fn origin(offset: Offset3d) -> Origin3d {
    Origin3d {
        x: offset.x,
        y: offset.y,
        z: offset.z,
    }
}

pub const fn extent(extent: Extent3d) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: extent.width,
        height: extent.height,
        depth_or_array_layers: extent.depth,
    }
}

/// Copies touch the depth aspect of depth formats; stencil is never copied.
pub const fn copy_aspect(format: Format) -> TextureAspect {
    if format.is_depth() {
        TextureAspect::DepthOnly
    } else {
        TextureAspect::All
    }
}

/// Row pitch rounded up to [`ROW_ALIGNMENT`].
pub const fn aligned_row_pitch(row_bytes: u32) -> u32 {
    row_bytes.div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT
}

/// Copy `rows` rows of `row_bytes` each from `data`, laid out every `src_pitch` bytes, into a
/// buffer whose rows start every `dst_pitch` bytes.
///
/// # Errors
/// [`RhiError::InvalidArgument`] when `data` holds fewer rows than requested.
pub fn repack_rows(data: &[u8], rows: usize, row_bytes: usize, src_pitch: usize, dst_pitch: usize) -> RhiResult<Vec<u8>> {
    let needed = rows.saturating_sub(1) * src_pitch + row_bytes;
    if rows > 0 && data.len() < needed {
        return Err(RhiError::InvalidArgument(format!(
            "texture upload needs {needed} bytes, got {}",
            data.len()
        )));
    }
    let mut packed = vec![0; rows * dst_pitch];
    for (src, dst) in data
        .chunks(src_pitch)
        .zip(packed.chunks_mut(dst_pitch))
        .take(rows)
    {
        dst[..row_bytes].copy_from_slice(&src[..row_bytes]);
    }
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_stencil_needs_feature_for_float_variant() {
        assert_eq!(
            texture_format(Format::D24UnormS8Uint, Features::empty()),
            Ok(TextureFormat::Depth24PlusStencil8)
        );
        assert!(texture_format(Format::D32FloatS8Uint, Features::empty()).is_err());
        assert_eq!(
            texture_format(Format::D32FloatS8Uint, Features::DEPTH32FLOAT_STENCIL8),
            Ok(TextureFormat::Depth32FloatStencil8)
        );
    }

    #[test]
    fn mapped_heaps_only_copy() {
        assert_eq!(
            buffer_usages(MemoryType::ReadBack),
            BufferUsages::MAP_READ | BufferUsages::COPY_DST
        );
        assert!(!buffer_usages(MemoryType::Upload).contains(BufferUsages::STORAGE));
        assert!(buffer_usages(MemoryType::DeviceLocal).contains(BufferUsages::INDIRECT));
    }

    #[test]
    fn multisampled_textures_drop_storage() {
        let single = texture_usages(TextureFormat::Rgba8Unorm, 1, Features::empty());
        let multi = texture_usages(TextureFormat::Rgba8Unorm, 4, Features::empty());
        assert!(single.contains(TextureUsages::STORAGE_BINDING));
        assert!(!multi.contains(TextureUsages::STORAGE_BINDING));
        assert!(multi.contains(TextureUsages::RENDER_ATTACHMENT));
    }

    #[test]
    fn cube_layers_fold_into_depth() {
        let mut desc = TextureDesc::new_2d(Format::Rgba8Unorm, 16, 16);
        desc.kind = TextureKind::TextureCube;
        assert_eq!(texture_size(&desc).depth_or_array_layers, 6);
    }

    #[test]
    fn rows_are_padded_to_the_copy_alignment() {
        assert_eq!(aligned_row_pitch(1), 256);
        assert_eq!(aligned_row_pitch(256), 256);
        assert_eq!(aligned_row_pitch(257), 512);

        let data: Vec<u8> = (0..12).collect();
        let packed = repack_rows(&data, 3, 3, 4, 8).unwrap();
        assert_eq!(packed.len(), 24);
        assert_eq!(&packed[..3], &[0, 1, 2]);
        assert_eq!(&packed[8..11], &[4, 5, 6]);
        assert_eq!(&packed[16..19], &[8, 9, 10]);
        assert!(repack_rows(&data[..5], 3, 3, 4, 8).is_err());
    }
}
