//! Highway 블록 정의
//!
//! - Block: 리소스 조각 하나 (Query 블록은 본문 없음)
//! - BlockAck: 블록마다 서버가 돌려주는 응답
//! - BlockPlan: 리소스를 블록으로 나눈 계획 (CRC 미리 계산)
//!
//! 와이어 형식: `[u32 LE 길이][u16 LE 헤더 길이][bincode 헤더][데이터]`,
//! ack는 `[u32 LE 길이][bincode BlockAck]`

use std::io;

use bytes::Bytes;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::ticket::{Resource, ResourceDigest, ResourceHandle, TransferTicket};

/// ack 최대 크기
const MAX_ACK_SIZE: usize = 64 * 1024;

/// 인증 토큰 최대 크기. 헤더 길이 필드(u16)에 고정 필드와 함께 들어가야 함
pub const MAX_AUTHORIZATION_SIZE: usize = 60 * 1024;

/// 블록 인코딩 에러
#[derive(Debug, thiserror::Error)]
pub enum BlockEncodeError {
    #[error("블록 헤더 직렬화 실패: {0}")]
    Serialize(#[from] bincode::Error),

    #[error("블록 헤더 크기 초과: {0} > 65535")]
    HeaderTooLarge(usize),

    #[error("블록 크기 초과: {0}")]
    BodyTooLarge(usize),
}

/// 블록 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// 전송 시작 전 존재 여부 확인 / 이어받기 위치 통지
    Query,
    Data,
}

/// 블록 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub kind: BlockKind,

    pub command_id: u32,

    /// 블록 인덱스. Query에서는 다음에 보낼 블록 인덱스 (이어받기 위치)
    pub seq: u32,

    /// 리소스 내 오프셋 (바이트)
    pub offset: u64,

    pub data_len: u32,

    /// 전체 리소스 크기
    pub total_size: u64,

    pub crc32: u32,

    pub digest: ResourceDigest,

    /// 티켓 인증 토큰
    pub authorization: Vec<u8>,
}

/// 블록 (송신 단위)
#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub data: Bytes,
}

impl Block {
    pub fn to_bytes(&self) -> Result<Vec<u8>, BlockEncodeError> {
        let header_bytes = bincode::serialize(&self.header)?;
        let header_len = u16::try_from(header_bytes.len())
            .map_err(|_| BlockEncodeError::HeaderTooLarge(header_bytes.len()))?;
        let body_len = 2 + header_bytes.len() + self.data.len();
        let prefix = u32::try_from(body_len).map_err(|_| BlockEncodeError::BodyTooLarge(body_len))?;

        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend_from_slice(&prefix.to_le_bytes());
        buf.extend_from_slice(&header_len.to_le_bytes());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }

    /// 길이 접두사를 뗀 본문에서 복원
    pub fn from_body(body: &[u8]) -> Option<Self> {
        if body.len() < 2 {
            return None;
        }

        let header_len = u16::from_le_bytes([body[0], body[1]]) as usize;
        if body.len() < 2 + header_len {
            return None;
        }

        let header: BlockHeader = bincode::deserialize(&body[2..2 + header_len]).ok()?;
        let data = Bytes::copy_from_slice(&body[2 + header_len..]);
        if data.len() != header.data_len as usize {
            return None;
        }

        Some(Self { header, data })
    }

    pub fn verify_crc(&self) -> bool {
        crc32fast::hash(&self.data) == self.header.crc32
    }

    pub fn is_query(&self) -> bool {
        self.header.kind == BlockKind::Query
    }
}

/// 블록 응답 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    /// Query 응답: 서버에 이미 있음
    Exists(ResourceHandle),
    /// Query 응답: 전송 진행
    Continue,
    /// 중간 블록 수신 완료
    Received,
    /// 마지막 블록 수신, 리소스 등록 완료
    Completed(ResourceHandle),
}

/// 블록 응답
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAck {
    pub seq: u32,
    /// 0이면 성공
    pub result_code: i32,
    pub message: String,
    pub status: AckStatus,
}

impl BlockAck {
    pub fn ok(seq: u32, status: AckStatus) -> Self {
        Self {
            seq,
            result_code: 0,
            message: String::new(),
            status,
        }
    }

    pub fn error(seq: u32, result_code: i32, message: impl Into<String>) -> Self {
        Self {
            seq,
            result_code,
            message: message.into(),
            status: AckStatus::Received,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result_code == 0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        let body = bincode::serialize(self)?;
        let mut buf = Vec::with_capacity(4 + body.len());
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }
}

/// 블록 분할 계획
///
/// CRC는 rayon으로 미리 계산, 이어받기 때도 다시 계산하지 않음
#[derive(Debug, Clone)]
pub struct BlockPlan {
    block_size: usize,
    total_size: u64,
    crcs: Vec<u32>,
}

impl BlockPlan {
    pub fn new(data: &[u8], block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let mut crcs: Vec<u32> = data.par_chunks(block_size).map(crc32fast::hash).collect();

        // 빈 리소스도 완료 응답을 받으려면 블록 하나는 필요
        if crcs.is_empty() {
            crcs.push(crc32fast::hash(&[]));
        }

        Self {
            block_size,
            total_size: data.len() as u64,
            crcs,
        }
    }

    pub fn len(&self) -> usize {
        self.crcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crcs.is_empty()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// 블록 인덱스의 (오프셋, 길이)
    pub fn range(&self, index: usize) -> (usize, usize) {
        let offset = index * self.block_size;
        let end = (offset + self.block_size).min(self.total_size as usize);
        (offset, end.saturating_sub(offset))
    }

    /// Query 블록 (`resume_from`: 다음에 보낼 블록 인덱스)
    pub fn query_block(&self, ticket: &TransferTicket, resume_from: usize) -> Block {
        Block {
            header: BlockHeader {
                kind: BlockKind::Query,
                command_id: ticket.command_id,
                seq: resume_from as u32,
                offset: self.range(resume_from.min(self.len() - 1)).0 as u64,
                data_len: 0,
                total_size: self.total_size,
                crc32: 0,
                digest: ticket.resource_digest,
                authorization: ticket.authorization.clone(),
            },
            data: Bytes::new(),
        }
    }

    /// 데이터 블록 (복사 없이 리소스 버퍼를 잘라 씀)
    pub fn data_block(&self, index: usize, resource: &Resource, ticket: &TransferTicket) -> Block {
        let (offset, len) = self.range(index);
        Block {
            header: BlockHeader {
                kind: BlockKind::Data,
                command_id: ticket.command_id,
                seq: index as u32,
                offset: offset as u64,
                data_len: len as u32,
                total_size: self.total_size,
                crc32: self.crcs[index],
                digest: resource.digest,
                authorization: ticket.authorization.clone(),
            },
            data: resource.data.slice(offset..offset + len),
        }
    }
}

/// 블록 쓰기
pub async fn write_block<W: AsyncWrite + Unpin>(writer: &mut W, block: &Block) -> io::Result<()> {
    let bytes = block
        .to_bytes()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// 블록 읽기 (서버 측)
pub async fn read_block<R: AsyncRead + Unpin>(reader: &mut R, max_len: usize) -> io::Result<Block> {
    let body = read_prefixed(reader, max_len).await?;
    Block::from_body(&body)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "블록 형식 오류"))
}

/// ack 쓰기 (서버 측)
pub async fn write_ack<W: AsyncWrite + Unpin>(writer: &mut W, ack: &BlockAck) -> io::Result<()> {
    let bytes = ack
        .to_bytes()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// ack 읽기
pub async fn read_ack<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<BlockAck> {
    let body = read_prefixed(reader, MAX_ACK_SIZE).await?;
    bincode::deserialize(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

async fn read_prefixed<R: AsyncRead + Unpin>(reader: &mut R, max_len: usize) -> io::Result<Vec<u8>> {
    let len = reader.read_u32_le().await? as usize;
    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("길이 초과: {} > {}", len, max_len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}
