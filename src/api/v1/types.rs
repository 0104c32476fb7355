use serde::Serialize;

use crate::jobs::JobId;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTicket {
    pub job_id: JobId,
    /// Present when subscriptions require a token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Delivery {
    pub delivered: usize,
}

#[derive(Debug, Serialize)]
pub struct Clients {
    pub clients: usize,
}
