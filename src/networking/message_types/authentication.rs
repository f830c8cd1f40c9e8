use rand::RngCore;
use serde::{Deserialize, Serialize};

pub const CHALLENGE_SIZE: usize = 32;
pub const SALT_SIZE: usize = 16;

/// Sent by the server in reply to `BeginAuthenticationRequest`. Both fields are fresh
/// random bytes for every attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationChallenge {
    challenge: [u8; CHALLENGE_SIZE],
    salt: [u8; SALT_SIZE],
}

impl AuthenticationChallenge {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let mut challenge = [0u8; CHALLENGE_SIZE];
        let mut salt = [0u8; SALT_SIZE];
        rng.fill_bytes(&mut challenge);
        rng.fill_bytes(&mut salt);
        AuthenticationChallenge { challenge, salt }
    }

    pub fn challenge(&self) -> &[u8; CHALLENGE_SIZE] {
        &self.challenge
    }

    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }

    /// keyed_hash(blake3(salt || password), challenge)
    pub fn respond(&self, password: &str) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.salt);
        hasher.update(password.as_bytes());
        let key = hasher.finalize();
        *blake3::keyed_hash(key.as_bytes(), &self.challenge).as_bytes()
    }

    /// Checks a response against the password the server was configured with.
    pub fn verify(&self, password: &str, response: &[u8; 32]) -> bool {
        // Hash equality is constant time
        blake3::Hash::from(self.respond(password)) == blake3::Hash::from(*response)
    }
}

impl Default for AuthenticationChallenge {
    fn default() -> Self {
        AuthenticationChallenge::new()
    }
}

/// Sent by the client to finish authenticating. `player_name` is the name the client
/// wants to be known by for the rest of the session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationResponse {
    player_name: String,
    response: [u8; 32],
}

impl AuthenticationResponse {
    pub fn new(player_name: &str, challenge: &AuthenticationChallenge, password: &str) -> Self {
        AuthenticationResponse {
            player_name: player_name.to_string(),
            response: challenge.respond(password),
        }
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub fn response(&self) -> &[u8; 32] {
        &self.response
    }
}
