use bitflags::bitflags;

/// Protocol version byte for request frames.
pub const REQUEST_VERSION: u8 = 0x01;
/// Protocol version byte for response frames.
pub const RESPONSE_VERSION: u8 = 0x81;

/// Frame header length: version, flags, stream, opcode, 4-byte body length.
pub const FRAME_HEADER_LEN: usize = 8;

/// Number of usable request stream ids (0..=127).
pub const STREAM_ID_POOL_SIZE: usize = 128;

/// Sanity bound for response body length; anything larger is treated as a
/// corrupt frame rather than an allocation request.
pub const MAX_FRAME_BODY_LEN: usize = 256 * 1024 * 1024;

/// CQL frame opcodes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Error = 0x00,
    Startup = 0x01,
    Ready = 0x02,
    Authenticate = 0x03,
    Credentials = 0x04,
    Options = 0x05,
    Supported = 0x06,
    Query = 0x07,
    Result = 0x08,
    Prepare = 0x09,
    Execute = 0x0a,
    Register = 0x0b,
    Event = 0x0c,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Error),
            0x01 => Some(Self::Startup),
            0x02 => Some(Self::Ready),
            0x03 => Some(Self::Authenticate),
            0x04 => Some(Self::Credentials),
            0x05 => Some(Self::Options),
            0x06 => Some(Self::Supported),
            0x07 => Some(Self::Query),
            0x08 => Some(Self::Result),
            0x09 => Some(Self::Prepare),
            0x0a => Some(Self::Execute),
            0x0b => Some(Self::Register),
            0x0c => Some(Self::Event),
            _ => None,
        }
    }
}

bitflags! {
    /// Frame header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        const COMPRESSION = 0x01;
        const TRACING = 0x02;
    }
}

bitflags! {
    /// Flag byte carried in QUERY/EXECUTE bodies
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueryFlags: u8 {
        const TRACING = 0x01;
        const PAGING = 0x02;
    }
}

/// Consistency level, serialized as a 16-bit code
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Any = 0x0000,
    One = 0x0001,
    Two = 0x0002,
    Three = 0x0003,
    Quorum = 0x0004,
    All = 0x0005,
    LocalQuorum = 0x0006,
    EachQuorum = 0x0007,
}

impl Consistency {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::Any),
            0x0001 => Some(Self::One),
            0x0002 => Some(Self::Two),
            0x0003 => Some(Self::Three),
            0x0004 => Some(Self::Quorum),
            0x0005 => Some(Self::All),
            0x0006 => Some(Self::LocalQuorum),
            0x0007 => Some(Self::EachQuorum),
            _ => None,
        }
    }
}

/// RESULT body kind codes
pub mod result_kind {
    pub const VOID: i32 = 0x0001;
    pub const ROWS: i32 = 0x0002;
    pub const SET_KEYSPACE: i32 = 0x0003;
    pub const PREPARED: i32 = 0x0004;
    pub const SCHEMA_CHANGE: i32 = 0x0005;
}

/// Rows metadata flags
pub mod metadata_flags {
    pub const GLOBAL_TABLES_SPEC: i32 = 0x0001;
}

/// ERROR body codes that carry extra fields after the message
pub mod error_code {
    pub const UNAVAILABLE: i32 = 0x1000;
    pub const WRITE_TIMEOUT: i32 = 0x1100;
    pub const READ_TIMEOUT: i32 = 0x1200;
}

/// Column type codes ([option] ids in result metadata)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Custom = 0x0000,
    Ascii = 0x0001,
    Bigint = 0x0002,
    Blob = 0x0003,
    Boolean = 0x0004,
    Counter = 0x0005,
    Decimal = 0x0006,
    Double = 0x0007,
    Float = 0x0008,
    Int = 0x0009,
    Text = 0x000a,
    Timestamp = 0x000b,
    Uuid = 0x000c,
    Varchar = 0x000d,
    Varint = 0x000e,
    Timeuuid = 0x000f,
    Inet = 0x0010,
    List = 0x0020,
    Map = 0x0021,
    Set = 0x0022,
}

impl TypeCode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::Custom),
            0x0001 => Some(Self::Ascii),
            0x0002 => Some(Self::Bigint),
            0x0003 => Some(Self::Blob),
            0x0004 => Some(Self::Boolean),
            0x0005 => Some(Self::Counter),
            0x0006 => Some(Self::Decimal),
            0x0007 => Some(Self::Double),
            0x0008 => Some(Self::Float),
            0x0009 => Some(Self::Int),
            0x000a => Some(Self::Text),
            0x000b => Some(Self::Timestamp),
            0x000c => Some(Self::Uuid),
            0x000d => Some(Self::Varchar),
            0x000e => Some(Self::Varint),
            0x000f => Some(Self::Timeuuid),
            0x0010 => Some(Self::Inet),
            0x0020 => Some(Self::List),
            0x0021 => Some(Self::Map),
            0x0022 => Some(Self::Set),
            _ => None,
        }
    }
}

/// Server-push event type names used in REGISTER bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    TopologyChange,
    StatusChange,
    SchemaChange,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopologyChange => "TOPOLOGY_CHANGE",
            Self::StatusChange => "STATUS_CHANGE",
            Self::SchemaChange => "SCHEMA_CHANGE",
        }
    }
}
