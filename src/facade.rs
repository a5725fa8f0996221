//! 업로드 명령 파사드
//!
//! 제어 채널로 티켓을 요청하고, 응답에 따라 Highway 엔진을 돌림:
//! - `Failed`: `UploadFailed` 이벤트 후 에러 ("over file size max"는 `OverFileSizeMax`)
//! - `FileExists`: `UploadSucceeded` 이벤트, 전송 없이 핸들 반환
//! - `RequireUpload`: 받은 티켓으로 엔진 실행

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::connection::Connection;
use crate::highway::{
    CancelSignal, HighwayEngine, Resource, ResourceDigest, ResourceHandle, ResourceKind,
    TransferFailure, TransferOutcome, TransferTicket,
};
use crate::{Error, Result};

/// 서버가 크기 초과를 알릴 때 쓰는 메시지
pub const OVER_FILE_SIZE_MAX: &str = "over file size max";

/// 티켓 요청 본문
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRequest {
    /// 대상 (그룹 코드 또는 상대 계정)
    pub target: u64,
    pub resource_id: String,
    pub digest: ResourceDigest,
    pub size: u64,
    pub kind: ResourceKind,
}

/// 티켓 응답 본문
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TicketResponse {
    Failed { result_code: i32, message: String },
    FileExists { handle: ResourceHandle },
    RequireUpload { ticket: TransferTicket },
}

/// 리소스 종류별 티켓 요청 명령
pub fn ticket_command(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::GroupImage => "ImgStore.GroupPicUp",
        ResourceKind::PrivateImage => "LongConn.OffPicUp",
        ResourceKind::GroupAudio => "PttStore.GroupPttUp",
        ResourceKind::PrivateAudio => "PttStore.C2CPttUp",
        ResourceKind::File => "FileStore.ApplyUpload",
    }
}

pub struct UploadFacade {
    connection: Connection,
    engine: Arc<HighwayEngine>,
}

impl UploadFacade {
    pub fn new(connection: Connection, engine: Arc<HighwayEngine>) -> Self {
        Self { connection, engine }
    }

    pub async fn upload(&self, target: u64, resource: Resource) -> Result<ResourceHandle> {
        self.upload_with_cancel(target, resource, CancelSignal::new())
            .await
    }

    pub async fn upload_with_cancel(
        &self,
        target: u64,
        resource: Resource,
        cancel: CancelSignal,
    ) -> Result<ResourceHandle> {
        let request = TicketRequest {
            target,
            resource_id: resource.resource_id(),
            digest: resource.digest,
            size: resource.size,
            kind: resource.kind,
        };
        let command = ticket_command(resource.kind);
        debug!("티켓 요청: {} {}", command, request.resource_id);

        let response = self
            .connection
            .send(command, bincode::serialize(&request)?)
            .await?;
        if !response.is_success() {
            return Err(Error::ServerError {
                code: response.result_code,
                message: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        match bincode::deserialize::<TicketResponse>(&response.body)? {
            TicketResponse::Failed {
                result_code,
                message,
            } => {
                let failure = TransferFailure::TicketRejected {
                    code: result_code,
                    reason: message.clone(),
                };
                self.engine
                    .finish(&request.resource_id, TransferOutcome::Failed(failure));

                if message == OVER_FILE_SIZE_MAX {
                    return Err(Error::OverFileSizeMax);
                }
                Err(Error::ServerError {
                    code: result_code,
                    message,
                })
            }
            TicketResponse::FileExists { handle } => {
                info!("서버에 이미 존재: {}", handle.resource_id);
                self.engine.finish(
                    &request.resource_id,
                    TransferOutcome::AlreadyExists(handle.clone()),
                );
                Ok(handle)
            }
            TicketResponse::RequireUpload { ticket } => {
                match self.engine.upload_with_cancel(resource, ticket, cancel).await {
                    TransferOutcome::AlreadyExists(handle) | TransferOutcome::Completed(handle) => {
                        Ok(handle)
                    }
                    TransferOutcome::Failed(failure) => Err(Error::UploadFailed(failure)),
                }
            }
        }
    }

    pub fn engine(&self) -> &HighwayEngine {
        &self.engine
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}
