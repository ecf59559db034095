use super::{LocalStrategy, Objective, ObjectiveInput, task_objective};
use crate::{ClientErr, ControlUpdate, Result};

/// SCAFFOLD: drift correction with control variates.
///
/// After every optimizer step the parameters move by
/// `-lr * (server_control - client_control)`. Once training ends the client's
/// new control is `client_control - server_control + (w_global - w) / (steps * lr)`.
#[derive(Debug, Clone)]
pub struct Scaffold {
    server_control: Vec<f32>,
    client_control: Vec<f32>,
}

impl Scaffold {
    /// Returns a new `Scaffold` holding copies of both control variates.
    ///
    /// # Errors
    /// Returns `ClientErr::ControlLengthMismatch` if their lengths differ.
    pub fn new(server_control: Vec<f32>, client_control: Vec<f32>) -> Result<Self> {
        if server_control.len() != client_control.len() {
            return Err(ClientErr::ControlLengthMismatch {
                what: "client control",
                got: client_control.len(),
                expected: server_control.len(),
            });
        }

        Ok(Self {
            server_control,
            client_control,
        })
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        if got != self.server_control.len() {
            return Err(ClientErr::ControlLengthMismatch {
                what,
                got,
                expected: self.server_control.len(),
            });
        }

        Ok(())
    }
}

impl LocalStrategy for Scaffold {
    fn compute_local_objective(
        &mut self,
        input: ObjectiveInput<'_>,
        _grads: &mut [f32],
    ) -> Result<Objective> {
        task_objective(&input)
    }

    fn post_step_hook(&mut self, params: &mut [f32], lr: f32) -> Result<()> {
        self.check_len("parameters", params.len())?;

        for ((w, c), ci) in params
            .iter_mut()
            .zip(&self.server_control)
            .zip(&self.client_control)
        {
            *w -= lr * (c - ci);
        }

        Ok(())
    }

    fn finish(
        &mut self,
        global: &[f32],
        params: &[f32],
        steps: usize,
        lr: f32,
    ) -> Result<Option<ControlUpdate>> {
        self.check_len("global parameters", global.len())?;
        self.check_len("parameters", params.len())?;

        if steps == 0 || lr <= 0. {
            let unchanged = self.client_control.clone();
            return Ok(Some(ControlUpdate::new(vec![0.; unchanged.len()], unchanged)));
        }

        let scale = 1. / (steps as f32 * lr);
        let mut new_control = Vec::with_capacity(params.len());
        let mut delta = Vec::with_capacity(params.len());

        for (((ci, c), wg), w) in self
            .client_control
            .iter()
            .zip(&self.server_control)
            .zip(global)
            .zip(params)
        {
            let next = ci - c + (wg - w) * scale;
            new_control.push(next);
            delta.push(next - ci);
        }

        Ok(Some(ControlUpdate::new(delta, new_control)))
    }
}
