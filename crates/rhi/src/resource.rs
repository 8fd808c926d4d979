//! Resource handles, descriptors and the logical access states tracked per recording session.
//!
//! Handles are cheap to clone and compare by [`ResourceId`]. None of them carries a mutable
//! "current state": that lives in the [`StateTracking`](crate::StateTracking) of whichever
//! recording session is using the resource.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a resource or device object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub u64);

impl ResourceId {
    /// Allocate a fresh identifier.
    #[inline]
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque backend handle. Each backend decides what the value means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NativeHandle(pub u64);

impl NativeHandle {
    pub const NULL: Self = Self(0);
}

/// Logical access mode of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResourceState {
    #[default]
    Undefined,
    General,
    VertexBuffer,
    IndexBuffer,
    ConstantBuffer,
    StreamOutput,
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthRead,
    DepthWrite,
    Present,
    IndirectArgument,
    CopySource,
    CopyDestination,
    ResolveSource,
    ResolveDestination,
    AccelerationStructure,
    AccelerationStructureBuildInput,
}

impl ResourceState {
    /// States whose accesses may write the resource.
    #[inline]
    pub const fn is_write(self) -> bool {
        matches!(
            self,
            Self::General
                | Self::StreamOutput
                | Self::UnorderedAccess
                | Self::RenderTarget
                | Self::DepthWrite
                | Self::CopyDestination
                | Self::ResolveDestination
                | Self::AccelerationStructure
        )
    }
}

/// Heap a buffer or texture lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemoryType {
    #[default]
    DeviceLocal,
    Upload,
    ReadBack,
}

/// Texel formats understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Format {
    #[default]
    Rgba8Unorm,
    Bgra8Unorm,
    R8Unorm,
    R16Float,
    Rgba16Float,
    R32Float,
    R32Uint,
    Rg32Float,
    Rgba32Float,
    Rgba32Uint,
    D16Unorm,
    D24UnormS8Uint,
    D32Float,
    D32FloatS8Uint,
}

impl Format {
    /// Size of one texel in bytes.
    pub const fn bytes_per_texel(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::R16Float | Self::D16Unorm => 2,
            Self::Rgba8Unorm
            | Self::Bgra8Unorm
            | Self::R32Float
            | Self::R32Uint
            | Self::D24UnormS8Uint
            | Self::D32Float => 4,
            Self::Rgba16Float | Self::Rg32Float | Self::D32FloatS8Uint => 8,
            Self::Rgba32Float | Self::Rgba32Uint => 16,
        }
    }

    #[inline]
    pub const fn is_depth(self) -> bool {
        matches!(
            self,
            Self::D16Unorm | Self::D24UnormS8Uint | Self::D32Float | Self::D32FloatS8Uint
        )
    }

    #[inline]
    pub const fn has_stencil(self) -> bool {
        matches!(self, Self::D24UnormS8Uint | Self::D32FloatS8Uint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Offset3d {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureKind {
    Texture1D,
    #[default]
    Texture2D,
    Texture3D,
    TextureCube,
}

/// Mip/layer window of a texture. `u32::MAX` counts mean "everything from the base".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl SubresourceRange {
    pub const ENTIRE: Self = Self {
        base_mip: 0,
        mip_count: u32::MAX,
        base_layer: 0,
        layer_count: u32::MAX,
    };

    /// Single mip level of a single layer.
    pub const fn mip(level: u32, layer: u32) -> Self {
        Self {
            base_mip: level,
            mip_count: 1,
            base_layer: layer,
            layer_count: 1,
        }
    }

    /// Clamp the open-ended counts against a texture.
    pub fn resolve(self, desc: &TextureDesc) -> Self {
        let mips = desc.mip_count.saturating_sub(self.base_mip);
        let layers = desc.layer_count().saturating_sub(self.base_layer);
        Self {
            base_mip: self.base_mip,
            mip_count: self.mip_count.min(mips),
            base_layer: self.base_layer,
            layer_count: self.layer_count.min(layers),
        }
    }

    /// Whether this range addresses every subresource of the texture.
    pub fn covers(self, desc: &TextureDesc) -> bool {
        let resolved = self.resolve(desc);
        resolved.base_mip == 0
            && resolved.base_layer == 0
            && resolved.mip_count == desc.mip_count
            && resolved.layer_count == desc.layer_count()
    }
}

impl Default for SubresourceRange {
    fn default() -> Self {
        Self::ENTIRE
    }
}

/// Byte window of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BufferRange {
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferDesc {
    pub size: u64,
    pub memory_type: MemoryType,
    /// State the buffer starts and ends every recording session in.
    pub default_state: ResourceState,
    pub label: Option<String>,
}

impl BufferDesc {
    pub const fn new(size: u64) -> Self {
        Self {
            size,
            memory_type: MemoryType::DeviceLocal,
            default_state: ResourceState::Undefined,
            label: None,
        }
    }

    #[must_use]
    pub const fn with_default_state(mut self, state: ResourceState) -> Self {
        self.default_state = state;
        self
    }

    #[must_use]
    pub const fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = memory_type;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub format: Format,
    pub size: Extent3d,
    pub mip_count: u32,
    pub array_length: u32,
    pub sample_count: u32,
    pub memory_type: MemoryType,
    /// State the texture starts and ends every recording session in.
    pub default_state: ResourceState,
    pub label: Option<String>,
}

impl TextureDesc {
    /// Single-mip, single-sample 2D texture.
    pub const fn new_2d(format: Format, width: u32, height: u32) -> Self {
        Self {
            kind: TextureKind::Texture2D,
            format,
            size: Extent3d::new(width, height, 1),
            mip_count: 1,
            array_length: 1,
            sample_count: 1,
            memory_type: MemoryType::DeviceLocal,
            default_state: ResourceState::Undefined,
            label: None,
        }
    }

    #[must_use]
    pub const fn with_default_state(mut self, state: ResourceState) -> Self {
        self.default_state = state;
        self
    }

    #[must_use]
    pub const fn with_mips(mut self, mip_count: u32) -> Self {
        self.mip_count = mip_count;
        self
    }

    #[must_use]
    pub const fn with_samples(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Number of array layers, counting the six faces of cube textures.
    pub const fn layer_count(&self) -> u32 {
        match self.kind {
            TextureKind::TextureCube => self.array_length * 6,
            TextureKind::Texture1D | TextureKind::Texture2D | TextureKind::Texture3D => {
                self.array_length
            }
        }
    }
}

struct BufferInner {
    id: ResourceId,
    desc: BufferDesc,
    native: NativeHandle,
}

/// Shared handle to a buffer created by a backend.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    /// Wrap a native buffer. Backends call this from their resource creation path.
    pub fn new(desc: BufferDesc, native: NativeHandle) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                id: ResourceId::next(),
                desc,
                native,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    #[inline]
    pub fn desc(&self) -> &BufferDesc {
        &self.inner.desc
    }

    #[inline]
    pub fn native(&self) -> NativeHandle {
        self.inner.native
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.inner.desc.size
    }

    #[inline]
    pub fn default_state(&self) -> ResourceState {
        self.inner.desc.default_state
    }

    /// Range covering the whole buffer.
    #[inline]
    pub fn entire(&self) -> BufferRange {
        BufferRange {
            offset: 0,
            size: self.inner.desc.size,
        }
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Buffer {}

impl Hash for Buffer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.inner.id)
            .field("size", &self.inner.desc.size)
            .field("label", &self.inner.desc.label)
            .finish()
    }
}

struct TextureInner {
    id: ResourceId,
    desc: TextureDesc,
    native: NativeHandle,
}

/// Shared handle to a texture created by a backend.
#[derive(Clone)]
pub struct Texture {
    inner: Arc<TextureInner>,
}

impl Texture {
    pub fn new(desc: TextureDesc, native: NativeHandle) -> Self {
        Self {
            inner: Arc::new(TextureInner {
                id: ResourceId::next(),
                desc,
                native,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    #[inline]
    pub fn desc(&self) -> &TextureDesc {
        &self.inner.desc
    }

    #[inline]
    pub fn native(&self) -> NativeHandle {
        self.inner.native
    }

    #[inline]
    pub fn default_state(&self) -> ResourceState {
        self.inner.desc.default_state
    }

    /// View over the whole texture sharing the texture's native handle.
    pub fn full_view(&self) -> TextureView {
        TextureView::new(self.clone(), SubresourceRange::ENTIRE, self.inner.native)
    }
}

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Texture {}

impl Hash for Texture {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.inner.id)
            .field("format", &self.inner.desc.format)
            .field("size", &self.inner.desc.size)
            .field("label", &self.inner.desc.label)
            .finish()
    }
}

/// A texture plus the subresources a pass attaches or samples.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureView {
    texture: Texture,
    range: SubresourceRange,
    native: NativeHandle,
}

impl TextureView {
    pub const fn new(texture: Texture, range: SubresourceRange, native: NativeHandle) -> Self {
        Self {
            texture,
            range,
            native,
        }
    }

    #[inline]
    pub const fn texture(&self) -> &Texture {
        &self.texture
    }

    #[inline]
    pub const fn range(&self) -> SubresourceRange {
        self.range
    }

    #[inline]
    pub const fn native(&self) -> NativeHandle {
        self.native
    }
}

struct ObjectInner {
    id: ResourceId,
    native: NativeHandle,
    label: Option<String>,
}

macro_rules! device_object {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            inner: Arc<ObjectInner>,
        }

        impl $name {
            pub fn new(native: NativeHandle, label: Option<&str>) -> Self {
                Self {
                    inner: Arc::new(ObjectInner {
                        id: ResourceId::next(),
                        native,
                        label: label.map(str::to_owned),
                    }),
                }
            }

            #[inline]
            pub fn id(&self) -> ResourceId {
                self.inner.id
            }

            #[inline]
            pub fn native(&self) -> NativeHandle {
                self.inner.native
            }

            #[inline]
            pub fn label(&self) -> Option<&str> {
                self.inner.label.as_deref()
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.inner.id == other.inner.id
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.inner.id.hash(state);
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("id", &self.inner.id)
                    .field("label", &self.inner.label)
                    .finish()
            }
        }
    };
}

device_object!(
    /// Graphics pipeline created outside the engine.
    RenderPipeline
);
device_object!(
    /// Compute pipeline created outside the engine.
    ComputePipeline
);
device_object!(
    /// Ray-tracing pipeline created outside the engine.
    RayTracingPipeline
);
device_object!(
    /// Shader binding table used by ray dispatches.
    ShaderTable
);

/// What a query pool records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    Timestamp,
    AccelerationStructureCompactedSize,
    AccelerationStructureSerializedSize,
    AccelerationStructureCurrentSize,
}

struct QueryPoolInner {
    id: ResourceId,
    kind: QueryKind,
    count: u32,
    native: NativeHandle,
}

#[derive(Clone)]
pub struct QueryPool {
    inner: Arc<QueryPoolInner>,
}

impl QueryPool {
    pub fn new(kind: QueryKind, count: u32, native: NativeHandle) -> Self {
        Self {
            inner: Arc::new(QueryPoolInner {
                id: ResourceId::next(),
                kind,
                count,
                native,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    #[inline]
    pub fn kind(&self) -> QueryKind {
        self.inner.kind
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.inner.count
    }

    #[inline]
    pub fn native(&self) -> NativeHandle {
        self.inner.native
    }
}

impl PartialEq for QueryPool {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for QueryPool {}

impl fmt::Debug for QueryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPool")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("count", &self.inner.count)
            .finish()
    }
}

struct AccelerationStructureInner {
    id: ResourceId,
    size: u64,
    device_address: u64,
    native: NativeHandle,
}

#[derive(Clone)]
pub struct AccelerationStructure {
    inner: Arc<AccelerationStructureInner>,
}

impl AccelerationStructure {
    pub fn new(size: u64, device_address: u64, native: NativeHandle) -> Self {
        Self {
            inner: Arc::new(AccelerationStructureInner {
                id: ResourceId::next(),
                size,
                device_address,
                native,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    #[inline]
    pub fn device_address(&self) -> u64 {
        self.inner.device_address
    }

    #[inline]
    pub fn native(&self) -> NativeHandle {
        self.inner.native
    }
}

impl PartialEq for AccelerationStructure {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for AccelerationStructure {}

impl fmt::Debug for AccelerationStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccelerationStructure")
            .field("id", &self.inner.id)
            .field("size", &self.inner.size)
            .finish()
    }
}
