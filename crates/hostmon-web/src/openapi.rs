//! OpenAPI documentation definition.

use hostmon_core::model::{CpuSample, MemorySample};
use utoipa::OpenApi;

use crate::handlers::StatusResponse;
use crate::hub::{HubStats, Topic};
use crate::state::SamplerStatus;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::handle_health,
        crate::handlers::handle_cpus,
        crate::handlers::handle_cpu_cores,
        crate::handlers::handle_memory,
        crate::handlers::handle_status,
    ),
    components(schemas(
        CpuSample,
        MemorySample,
        StatusResponse,
        SamplerStatus,
        HubStats,
        Topic,
    )),
    info(
        title = "hostmon API",
        version = "1.0",
        description = "Host CPU and memory monitoring. Live streams at /realtime/cpus and /realtime/memory (WebSocket, one JSON sample per text message)."
    )
)]
pub(crate) struct ApiDoc;
