//! Frame-level client for tests that need to send hand-built requests

use gambit::crypto::{self, Identity, PlayerKey};
use gambit::messages::{FrameReader, FrameWriter, Tag, Tlv};
use std::time::Duration;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use super::test_data::login_profile;

pub struct RawPeer {
    pub identity: Identity,
    reader: FrameReader<ReadHalf<TcpStream>>,
    writer: FrameWriter<WriteHalf<TcpStream>>,
}

impl RawPeer {
    pub async fn connect(addr: &str) -> Self {
        Self::connect_as(addr, Identity::generate()).await
    }

    pub async fn connect_as(addr: &str, identity: Identity) -> Self {
        let stream = TcpStream::connect(addr).await.expect("Failed to connect");
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            identity,
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
        }
    }

    pub async fn send(&mut self, frame: Tlv) {
        self.writer.write_frame(&frame).await.expect("Failed to send frame");
    }

    /// Next frame, failing the test if none arrives in time
    pub async fn recv(&mut self) -> Tlv {
        tokio::time::timeout(Duration::from_secs(5), self.reader.read_frame())
            .await
            .expect("Timed out waiting for a frame")
            .expect("Read failed")
            .expect("Connection closed")
    }

    /// Next frame if one arrives within `wait`
    pub async fn recv_within(&mut self, wait: Duration) -> Option<Tlv> {
        match tokio::time::timeout(wait, self.reader.read_frame()).await {
            Ok(result) => result.expect("Read failed"),
            Err(_) => None,
        }
    }

    /// Log in and return the server key from the hello reply
    pub async fn login(&mut self, first_name: &str) -> PlayerKey {
        let profile = login_profile(&self.identity, first_name);
        self.send(Tlv::new(Tag::Login, profile.to_payload().unwrap())).await;
        let hello = self.recv().await;
        assert_eq!(hello.kind(), Some(Tag::ServerHello));
        PlayerKey::parse(std::str::from_utf8(&hello.value).unwrap()).unwrap()
    }

    pub fn signed(&self, tag: Tag, body: &[u8]) -> Tlv {
        Tlv::new(tag, crypto::sign(body, &self.identity))
    }

    pub fn sealed(&self, tag: Tag, body: &[u8], server: &PlayerKey) -> Tlv {
        Tlv::new(
            tag,
            crypto::seal(body, &self.identity, server.verifying_key()).unwrap(),
        )
    }

    /// A request whose signature has one flipped byte, encrypted when the
    /// tag calls for it
    pub fn tampered(&self, tag: Tag, body: &[u8], server: &PlayerKey) -> Tlv {
        let mut signed = crypto::sign(body, &self.identity);
        let last = signed.len() - 1;
        signed[last] ^= 0x40;

        if tag.is_encrypted_request() {
            Tlv::new(tag, crypto::encrypt(&signed, server.verifying_key()).unwrap())
        } else {
            Tlv::new(tag, signed)
        }
    }

    pub fn open_signed(&self, frame: &Tlv, server: &PlayerKey) -> Vec<u8> {
        crypto::open_signed(&frame.value, server.verifying_key())
            .expect("Reply signature did not verify")
            .to_vec()
    }

    pub fn open_sealed(&self, frame: &Tlv, server: &PlayerKey) -> Vec<u8> {
        crypto::open_sealed(&frame.value, &self.identity, server.verifying_key())
            .expect("Reply did not decrypt")
    }
}
