use bytes::Bytes;
use resp_proto::{TypeMapping, Value};

use crate::command::{CommandOptions, ReplyHandle};
use crate::error::{BatchError, Error, ServerError};
use crate::queue::CommandQueue;

/// How a [`Batch`] is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Commands are written back to back; each succeeds or fails alone.
    Pipeline,
    /// Commands are wrapped in `MULTI` ... `EXEC`.
    Transaction,
}

/// A group of commands submitted together as one chain.
///
/// If the connection is lost while the batch is being written, the members
/// not yet written are rejected along with those awaiting reply, so a
/// batch never straddles two connections.
#[derive(Debug, Clone)]
pub struct Batch {
    mode: BatchMode,
    commands: Vec<Vec<Bytes>>,
    type_mapping: Option<TypeMapping>,
}

impl Batch {
    pub fn pipeline() -> Self {
        Self::new(BatchMode::Pipeline)
    }

    pub fn transaction() -> Self {
        Self::new(BatchMode::Transaction)
    }

    fn new(mode: BatchMode) -> Self {
        Self {
            mode,
            commands: Vec::new(),
            type_mapping: None,
        }
    }

    /// Add a command.
    pub fn cmd<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.commands.push(
            args.into_iter()
                .map(|a| Bytes::copy_from_slice(a.as_ref()))
                .collect(),
        );
        self
    }

    /// Mapping for every reply of the batch.
    pub fn type_mapping(mut self, mapping: TypeMapping) -> Self {
        self.type_mapping = Some(mapping);
        self
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Queue every command, or none of them if they do not all fit.
    pub fn submit(self, queue: &mut CommandQueue) -> Result<BatchHandle, Error> {
        let mut handle = BatchHandle {
            mode: self.mode,
            multi: None,
            replies: Vec::with_capacity(self.commands.len()),
            exec: None,
        };
        if self.commands.is_empty() {
            return Ok(handle);
        }
        let wrapped = self.mode == BatchMode::Transaction;
        let total = self.commands.len() + if wrapped { 2 } else { 0 };
        queue.admit(total)?;

        let chain = queue.next_chain_id();
        let options = || {
            let options = CommandOptions::new().chain(chain);
            match self.type_mapping {
                Some(mapping) => options.type_mapping(mapping),
                None => options,
            }
        };
        if wrapped {
            handle.multi = Some(queue.enqueue([&b"MULTI"[..]], options())?);
        }
        for args in &self.commands {
            handle.replies.push(queue.enqueue(args, options())?);
        }
        if wrapped {
            handle.exec = Some(queue.enqueue([&b"EXEC"[..]], options())?);
        }
        Ok(handle)
    }
}

/// Completion handle for a submitted [`Batch`].
#[derive(Debug)]
pub struct BatchHandle {
    mode: BatchMode,
    multi: Option<ReplyHandle>,
    replies: Vec<ReplyHandle>,
    exec: Option<ReplyHandle>,
}

impl BatchHandle {
    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    /// Wait for every reply.
    ///
    /// Succeeds with the replies in submission order only if every command
    /// succeeded; otherwise fails with [`Error::Batch`] carrying each
    /// command's outcome. A transaction whose watched keys changed fails
    /// with [`Error::WatchFailed`].
    pub async fn wait(self) -> Result<Vec<Value>, Error> {
        let mut queued = Vec::with_capacity(self.replies.len());
        let multi = match self.multi {
            Some(multi) => Some(multi.await),
            None => None,
        };
        for reply in self.replies {
            queued.push(reply.await);
        }
        let Some(exec) = self.exec else {
            return BatchError::check(queued);
        };
        let exec = exec.await;
        if let Some(Err(e)) = multi {
            return Err(e);
        }
        match exec {
            Ok(value) => match value.into_stripped() {
                Value::Null => Err(Error::WatchFailed),
                Value::Array(items) => BatchError::check(
                    items
                        .into_iter()
                        .map(|v| {
                            if v.is_error() {
                                Err(Error::Server(ServerError::from_reply(v)))
                            } else {
                                Ok(v)
                            }
                        })
                        .collect(),
                ),
                _ => Err(Error::UnexpectedReply),
            },
            // Commands rejected while queueing abort the whole transaction.
            Err(Error::Server(e)) if e.code() == "EXECABORT" => match BatchError::check(queued) {
                Err(batch) => Err(batch),
                Ok(_) => Err(Error::Server(e)),
            },
            Err(e) => Err(e),
        }
    }
}
