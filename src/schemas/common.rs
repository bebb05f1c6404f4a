use poem_openapi::Object;

#[derive(Object, Debug)]
pub struct RenderSlots {
    pub available: u32,
    pub capacity: u32,
    pub utilization_pct: f64,
}

#[derive(Object, Debug)]
pub struct HealthResponse {
    pub status: String,

    /// Present only when concurrent renders are bounded
    pub render_slots: Option<RenderSlots>,

    pub reputation_check: bool,
}
