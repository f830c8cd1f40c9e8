/*!

# Networking

## Introduction

Nodes talk to each other with a small binary protocol carried over a stream
transport. Every message travels in an envelope; the envelope id lets a reply name the
request it answers.

## Envelopes

```bytes
0-1     id              (big-endian u16, 1..=65535)
2-3     correlation_id  (big-endian u16, 0 when the message answers nothing)
4-7     body_length     (big-endian u32, at most 1 MiB)
8..     body            (bincode-encoded Message)
```

`MessageEnvelope` and `HeaderBuilder` read and write this layout.

## Dispatch

A `RemoteNode` stands for one peer session. An inbound envelope goes to, in order:

1. the one-shot handler registered for its correlation id, if any
2. the handler registered for its message type
3. nobody, in which case the sender is told `UnhandledMessage`

A body that does not decode is answered with `UnknownMessage`. Errors are never
answered.

## Session

```bytes
client                              server
  Hello                     ->
                            <-      HelloResponse
  BeginAuthenticationRequest ->
                            <-      BeginAuthenticationResponse (challenge, salt)
  EndAuthenticationRequest   ->
                            <-      EndAuthenticationResponse (host name)
                            <-      SetTableMemento
                            <-      Players
```

After that either side may send `TableIncrement`, clients ask for control with
`RequestControl`, `CancelControlRequest` and `GiveControl`, and the server answers
every change with a fresh `Players`. `Goodbye` ends the session.

*/

pub mod message;
pub mod message_envelope;
pub mod message_types;
pub mod remote_node;
pub mod tcp;
pub mod transport;
