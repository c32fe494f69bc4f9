use comms::{
    ParamCodec,
    msg::{ClientMsg, ServerMsg},
    specs::config::{Config, Scalar},
};
use tokio::io::{self, AsyncWriteExt};

#[tokio::test]
async fn send_recv_instruction_and_reply() -> io::Result<()> {
    const SIZE: usize = 4096;

    let (one, two) = io::duplex(SIZE);
    let (sv_rx, sv_tx) = io::split(one);
    let (mut sv_rx, mut sv_tx) = comms::channel(sv_rx, sv_tx);
    let (cl_rx, cl_tx) = io::split(two);
    let (mut cl_rx, mut cl_tx) = comms::channel(cl_rx, cl_tx);

    let weights = vec![vec![1.0, 2.0, 3.0, 4.0], vec![0.5; 4]];
    let msg = ServerMsg::Evaluate {
        parameters: ParamCodec::encode(&weights),
        config: Config::from([("round".to_string(), Scalar::Int(2))]),
    };
    sv_tx.send(&msg).await?;

    let mut rx_buf = Vec::new();
    let ServerMsg::Evaluate { parameters, config } = cl_rx.recv_into(&mut rx_buf).await? else {
        panic!("expected an evaluate instruction");
    };
    assert_eq!(ParamCodec::decode(&parameters).unwrap(), weights);
    assert_eq!(config["round"], Scalar::Int(2));

    let reply = ClientMsg::EvaluateRes {
        loss: 1.5,
        num_examples: 20,
    };
    cl_tx.send(&reply).await?;

    let mut rx_buf = Vec::new();
    let ClientMsg::EvaluateRes { loss, num_examples } = sv_rx.recv_into(&mut rx_buf).await? else {
        panic!("expected an evaluate result");
    };
    assert_eq!((loss, num_examples), (1.5, 20));

    Ok(())
}

#[tokio::test]
async fn oversized_frame_is_rejected() -> io::Result<()> {
    let (one, two) = io::duplex(4096);
    let (_, tx) = io::split(one);
    let (_, mut tx) = comms::channel(io::empty(), tx);
    let (rx, _) = io::split(two);
    let (rx, _) = comms::channel(rx, io::sink());
    let mut rx = rx.with_max_msg_size(64);

    let parameters = ParamCodec::encode(&[vec![0.0; 64]]);
    tx.send(&ClientMsg::ParametersRes { parameters }).await?;

    let mut rx_buf = Vec::new();
    let err = rx.recv_into::<ClientMsg>(&mut rx_buf).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);

    Ok(())
}

#[tokio::test]
async fn closed_stream_reads_as_eof() {
    let (one, two) = io::duplex(64);
    drop(one);

    let (rx, _) = io::split(two);
    let (mut rx, _) = comms::channel(rx, io::sink());

    let mut rx_buf = Vec::new();
    let err = rx.recv_into::<ServerMsg>(&mut rx_buf).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
}

#[tokio::test]
async fn stream_closed_within_a_frame_is_invalid_data() -> io::Result<()> {
    let (mut one, two) = io::duplex(64);
    one.write_all(&16u64.to_be_bytes()).await?;
    one.write_all(&[0, 0, 0, 1, 0xff]).await?;
    drop(one);

    let (rx, _) = io::split(two);
    let (mut rx, _) = comms::channel(rx, io::sink());

    let mut rx_buf = Vec::new();
    let err = rx.recv_into::<ServerMsg>(&mut rx_buf).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);

    Ok(())
}
