//! Message routing capability
//!
//! [`Route`] is implemented twice: a plain [`SensorNode`] always hands the
//! message to the mesh, while the gateway first checks whether the message
//! is meant for the controller and otherwise delegates to its inner
//! `SensorNode`.

use tracing::{debug, warn};

use crate::mesh::MeshTransport;
use crate::message::{Message, NodeId};
#[cfg(feature = "signing")]
use crate::signing::{NoSigning, Signer};

/// Something that can send a message towards its destination
pub trait Route {
    /// Route a message; true when the chosen sink accepted it
    fn send_route(&mut self, message: Message) -> bool;
}

/// Plain mesh node behavior: sign, then send into the mesh
pub struct SensorNode<M> {
    mesh: M,
    #[cfg(feature = "signing")]
    signer: Box<dyn Signer + Send>,
}

impl<M: MeshTransport> SensorNode<M> {
    /// Wrap a mesh transport
    pub fn new(mesh: M) -> Self {
        Self {
            mesh,
            #[cfg(feature = "signing")]
            signer: Box::new(NoSigning),
        }
    }

    /// Replace the signing back-end
    #[cfg(feature = "signing")]
    pub fn set_signer(&mut self, signer: impl Signer + Send + 'static) {
        debug!(signer = signer.name(), "Signing back-end installed");
        self.signer = Box::new(signer);
    }

    /// Name of the signing back-end
    #[cfg(feature = "signing")]
    pub fn signer_name(&self) -> &str {
        self.signer.name()
    }

    /// Check an inbound message against the signing back-end
    pub fn verify(&self, message: &Message) -> bool {
        #[cfg(feature = "signing")]
        {
            self.signer.verify(message)
        }
        #[cfg(not(feature = "signing"))]
        {
            let _ = message;
            true
        }
    }

    /// Address of this node
    pub fn node_id(&self) -> NodeId {
        self.mesh.node_id()
    }

    /// The mesh transport
    pub fn mesh(&self) -> &M {
        &self.mesh
    }

    /// The mesh transport, mutably
    pub fn mesh_mut(&mut self) -> &mut M {
        &mut self.mesh
    }
}

impl<M: MeshTransport> Route for SensorNode<M> {
    fn send_route(&mut self, message: Message) -> bool {
        #[cfg(feature = "signing")]
        let message = self.signer.sign(message);

        let destination = message.destination;
        let accepted = self.mesh.send(message);
        if accepted {
            debug!(destination, mesh = self.mesh.name(), "Message accepted by mesh");
        } else {
            warn!(destination, mesh = self.mesh.name(), "Mesh rejected message");
        }
        accepted
    }
}
