use std::collections::BTreeMap;

/// The global model state of an experiment fold.
///
/// Owned by the coordinator and mutated only by aggregation. Clients get
/// copies of the parameters and controls, never references.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerState {
    global: Vec<f32>,
    server_control: Option<Vec<f32>>,
    client_controls: BTreeMap<String, Vec<f32>>,
}

impl ServerState {
    /// Returns a new `ServerState`.
    ///
    /// # Arguments
    /// * `global` - The initial global parameters.
    /// * `with_controls` - Whether to keep SCAFFOLD control variates, starting at zero.
    pub fn new(global: Vec<f32>, with_controls: bool) -> Self {
        let server_control = with_controls.then(|| vec![0.; global.len()]);

        Self {
            global,
            server_control,
            client_controls: BTreeMap::new(),
        }
    }

    pub fn global(&self) -> &[f32] {
        &self.global
    }

    pub fn num_params(&self) -> usize {
        self.global.len()
    }

    pub fn server_control(&self) -> Option<&[f32]> {
        self.server_control.as_deref()
    }

    /// Returns the persisted control of a client, `None` until it first reports.
    pub fn client_control(&self, client_id: &str) -> Option<&[f32]> {
        self.client_controls.get(client_id).map(Vec::as_slice)
    }

    pub(crate) fn global_mut(&mut self) -> &mut [f32] {
        &mut self.global
    }

    pub(crate) fn server_control_mut(&mut self) -> Option<&mut [f32]> {
        self.server_control.as_deref_mut()
    }

    pub(crate) fn set_client_control(&mut self, client_id: &str, control: Vec<f32>) {
        self.client_controls.insert(client_id.to_string(), control);
    }
}
