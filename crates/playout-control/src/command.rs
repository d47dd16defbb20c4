use std::sync::Arc;

use crossbeam::channel::Sender;
use playout_core::VideoFormat;
use playout_render::ControlOp;

use crate::error::{CommandError, ReplyStatus};

/// Where replies for a client go.
pub trait ReplySink: Send + Sync {
    fn send_reply(&self, reply: &str);
}

impl ReplySink for Sender<String> {
    fn send_reply(&self, reply: &str) {
        if self.send(reply.to_string()).is_err() {
            tracing::debug!(reply = reply.trim_end(), "client gone, reply discarded");
        }
    }
}

/// A unit of work submitted to a [`crate::CommandQueue`].
pub trait Command: Send {
    fn name(&self) -> &str;

    /// Run the command. Success replies are the command's own business.
    fn execute(&mut self) -> Result<(), CommandError>;

    fn send_reply(&self, reply: &str);
}

#[derive(Debug, Clone)]
enum ChannelAction {
    Stop,
    SetFormat(Option<String>),
}

/// Forwards a control operation to a running channel.
///
/// The operation is only queued here; the channel applies it between ticks.
pub struct ChannelCommand {
    name: String,
    action: ChannelAction,
    target: Option<Sender<ControlOp>>,
    reply: Arc<dyn ReplySink>,
}

impl ChannelCommand {
    /// `target` is `None` when the addressed channel does not exist.
    pub fn stop(target: Option<Sender<ControlOp>>, reply: Arc<dyn ReplySink>) -> Self {
        Self {
            name: "STOP".into(),
            action: ChannelAction::Stop,
            target,
            reply,
        }
    }

    /// Switch the channel to the preset named `format`.
    pub fn set_format(
        target: Option<Sender<ControlOp>>,
        format: Option<&str>,
        reply: Arc<dyn ReplySink>,
    ) -> Self {
        Self {
            name: "SET".into(),
            action: ChannelAction::SetFormat(format.map(str::to_string)),
            target,
            reply,
        }
    }

    fn op(&self) -> Result<ControlOp, CommandError> {
        match &self.action {
            ChannelAction::Stop => Ok(ControlOp::Stop),
            ChannelAction::SetFormat(None) => Err(CommandError::MissingParameter("format".into())),
            ChannelAction::SetFormat(Some(name)) => VideoFormat::preset(name)
                .map(ControlOp::Reconfigure)
                .map_err(|err| CommandError::InvalidParameter(err.to_string())),
        }
    }
}

impl Command for ChannelCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| CommandError::NotFound("channel".into()))?;
        let op = self.op()?;
        target
            .send(op)
            .map_err(|_| CommandError::ExpectedUserError("channel has stopped".into()))?;
        self.send_reply(&ReplyStatus::Ok.reply(&self.name));
        Ok(())
    }

    fn send_reply(&self, reply: &str) {
        self.reply.send_reply(reply);
    }
}
