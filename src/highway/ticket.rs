//! 리소스와 전송 티켓
//!
//! - Resource: 업로드할 바이트열 + 다이제스트/크기/종류/포맷
//! - TransferTicket: 제어 채널에서 받은 업로드 허가 (서버 후보 목록 + 인증 토큰)

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 리소스 다이제스트 크기 (SHA-256)
pub const DIGEST_SIZE: usize = 32;

pub type ResourceDigest = [u8; DIGEST_SIZE];

/// 리소스 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    GroupImage,
    PrivateImage,
    GroupAudio,
    PrivateAudio,
    File,
}

impl ResourceKind {
    /// Highway 명령 ID 기본값
    pub fn command_id(self) -> u32 {
        match self {
            ResourceKind::PrivateImage => 1,
            ResourceKind::GroupImage => 2,
            ResourceKind::PrivateAudio => 26,
            ResourceKind::GroupAudio => 29,
            ResourceKind::File => 71,
        }
    }

    pub fn is_audio(self) -> bool {
        matches!(self, ResourceKind::GroupAudio | ResourceKind::PrivateAudio)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::GroupImage => "group image",
            ResourceKind::PrivateImage => "private image",
            ResourceKind::GroupAudio => "group audio",
            ResourceKind::PrivateAudio => "private audio",
            ResourceKind::File => "file",
        };
        f.write_str(name)
    }
}

/// 리소스 포맷 (매직 바이트로 판별)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceFormat {
    Png,
    Jpg,
    Gif,
    Bmp,
    Amr,
    Silk,
    Unknown,
}

impl ResourceFormat {
    pub fn sniff(data: &[u8]) -> Self {
        if data.starts_with(&[0x89, b'P', b'N', b'G']) {
            ResourceFormat::Png
        } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            ResourceFormat::Jpg
        } else if data.starts_with(b"GIF8") {
            ResourceFormat::Gif
        } else if data.starts_with(b"BM") {
            ResourceFormat::Bmp
        } else if data.starts_with(b"#!AMR") {
            ResourceFormat::Amr
        } else if data.starts_with(b"#!SILK") || data.starts_with(b"\x02#!SILK") {
            ResourceFormat::Silk
        } else {
            ResourceFormat::Unknown
        }
    }

    /// 리소스 ID에 쓰는 확장자
    pub fn extension(self) -> &'static str {
        match self {
            ResourceFormat::Png => "png",
            ResourceFormat::Jpg => "jpg",
            ResourceFormat::Gif => "gif",
            ResourceFormat::Bmp => "bmp",
            ResourceFormat::Amr => "amr",
            ResourceFormat::Silk => "silk",
            ResourceFormat::Unknown => "bin",
        }
    }
}

/// 업로드 대상 리소스
///
/// 전송 동안에만 엔진이 소유하고, 호출자에게 돌려주지 않음
#[derive(Clone)]
pub struct Resource {
    pub data: Bytes,
    pub digest: ResourceDigest,
    pub size: u64,
    pub kind: ResourceKind,
    pub format: ResourceFormat,
}

impl Resource {
    pub fn from_bytes(data: impl Into<Bytes>, kind: ResourceKind) -> Self {
        let data = data.into();
        let digest: ResourceDigest = Sha256::digest(&data).into();
        let format = ResourceFormat::sniff(&data);

        Self {
            size: data.len() as u64,
            data,
            digest,
            kind,
            format,
        }
    }

    /// 파일에서 읽기
    pub async fn from_path(path: impl AsRef<Path>, kind: ResourceKind) -> crate::Result<Self> {
        let data = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(data, kind))
    }

    /// `{다이제스트 16진 대문자}.{확장자}`
    ///
    /// 음성은 포맷과 상관없이 amr 확장자로 등록됨
    pub fn resource_id(&self) -> String {
        let extension = if self.kind.is_audio() {
            "amr"
        } else {
            self.format.extension()
        };
        format!("{}.{}", hex::encode_upper(self.digest), extension)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.resource_id())
            .field("size", &self.size)
            .field("kind", &self.kind)
            .finish()
    }
}

/// 전송 채널 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// 전송 한 번 동안 유지되는 바이너리 세션
    Stream,
    /// 블록마다 요청 하나 (단순 업로드 경로)
    Request,
}

/// 업로드 서버
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub kind: ChannelKind,
}

impl Endpoint {
    pub fn stream(addr: SocketAddr) -> Self {
        Self {
            addr,
            kind: ChannelKind::Stream,
        }
    }

    pub fn request(addr: SocketAddr) -> Self {
        Self {
            addr,
            kind: ChannelKind::Request,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.addr, self.kind)
    }
}

/// 후보 서버를 모두 소진했을 때 시도할 대체 경로
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackRoute {
    pub kind: ChannelKind,
    pub addrs: Vec<SocketAddr>,
}

impl FallbackRoute {
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.addrs
            .iter()
            .map(|&addr| Endpoint {
                addr,
                kind: self.kind,
            })
            .collect()
    }
}

/// 전송 티켓
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTicket {
    pub resource_digest: ResourceDigest,
    pub resource_size: u64,

    /// 서버가 준 순서 그대로 시도
    pub candidate_endpoints: Vec<Endpoint>,

    /// 블록마다 실어 보내는 인증 토큰
    pub authorization: Vec<u8>,

    pub issued_at: SystemTime,
    pub expires_at: Option<SystemTime>,

    pub command_id: u32,
    pub fallback: Option<FallbackRoute>,
}

impl TransferTicket {
    /// 리소스 기준으로 티켓 골격 생성 (서버 측/테스트용)
    pub fn for_resource(resource: &Resource, endpoints: Vec<Endpoint>, authorization: Vec<u8>) -> Self {
        Self {
            resource_digest: resource.digest,
            resource_size: resource.size,
            candidate_endpoints: endpoints,
            authorization,
            issued_at: SystemTime::now(),
            expires_at: None,
            command_id: resource.kind.command_id(),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackRoute) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_expiry(mut self, expires_at: SystemTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.map(|t| now >= t).unwrap_or(false)
    }

    /// 리소스가 이 티켓 대상인지
    pub fn matches(&self, resource: &Resource) -> bool {
        self.resource_digest == resource.digest && self.resource_size == resource.size
    }
}

/// 업로드 완료 후 서버가 준 식별자
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub resource_id: String,
    pub file_id: u64,
}
