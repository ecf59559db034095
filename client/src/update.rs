use machine_learning::metrics::Metrics;

/// A client's new control variate and its change, reported by SCAFFOLD.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlUpdate {
    delta: Vec<f32>,
    client_control: Vec<f32>,
}

impl ControlUpdate {
    pub fn new(delta: Vec<f32>, client_control: Vec<f32>) -> Self {
        Self {
            delta,
            client_control,
        }
    }

    /// Returns `new_client_control - client_control`.
    pub fn delta(&self) -> &[f32] {
        &self.delta
    }

    pub fn client_control(&self) -> &[f32] {
        &self.client_control
    }

    pub fn into_client_control(self) -> Vec<f32> {
        self.client_control
    }
}

/// The result of one client's local training in one round.
///
/// Produced once and consumed once by aggregation; fields are read-only.
#[derive(Debug, Clone)]
pub struct ClientUpdate {
    client_id: String,
    params: Vec<f32>,
    sample_count: usize,
    metrics: Metrics,
    control: Option<ControlUpdate>,
}

impl ClientUpdate {
    /// Returns a new `ClientUpdate`.
    ///
    /// # Args
    /// * `client_id` - The client that trained.
    /// * `params` - The locally optimized parameters.
    /// * `sample_count` - The amount of samples the client trained on, its aggregation weight.
    /// * `metrics` - The epoch-averaged local metrics.
    /// * `control` - The control variate update, SCAFFOLD only.
    pub fn new(
        client_id: impl Into<String>,
        params: Vec<f32>,
        sample_count: usize,
        metrics: Metrics,
        control: Option<ControlUpdate>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            params,
            sample_count,
            metrics,
            control,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn control(&self) -> Option<&ControlUpdate> {
        self.control.as_ref()
    }

    /// Takes the control update out, leaving `None` behind.
    pub fn take_control(&mut self) -> Option<ControlUpdate> {
        self.control.take()
    }
}
