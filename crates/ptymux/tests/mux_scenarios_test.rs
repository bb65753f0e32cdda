//! End-to-end multiplexer behaviour against real child processes

#[cfg(unix)]
mod unix_tests {
    use ptymux::keys::DEFAULT_PREFIX;
    use ptymux::{MuxConfig, MuxState, SessionError};
    use ptymux_test_utils::{
        cat_config, drive_until, history_text, init_test_logging, memory_mux, screen_text, sh,
        type_keys,
    };
    use std::time::Duration;

    const LIMIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_digit_switch_routes_input_to_selected_session() {
        init_test_logging();
        let (mut mux, mut keys) = memory_mux(&cat_config(2));

        type_keys(&mut keys, &[DEFAULT_PREFIX, b'2']);
        type_keys(&mut keys, b"hello");

        let arrived = drive_until(&mut mux, LIMIT, |mux| {
            mux.registry().active_index() == 1
                && history_text(mux.registry().get(1).unwrap()).contains("hello")
        });
        assert!(arrived, "session 2 never echoed the input");

        assert!(!history_text(mux.registry().get(0).unwrap()).contains("hello"));
        assert!(screen_text(&mux).contains("hello"), "active output is streamed");

        mux.shutdown();
    }

    #[test]
    fn test_keystrokes_follow_the_active_session() {
        init_test_logging();
        let (mut mux, mut keys) = memory_mux(&cat_config(2));

        type_keys(&mut keys, b"aaa");
        type_keys(&mut keys, &[DEFAULT_PREFIX, b'n']);
        type_keys(&mut keys, b"bbb");
        type_keys(&mut keys, &[DEFAULT_PREFIX, b'p']);
        type_keys(&mut keys, b"ccc");

        let arrived = drive_until(&mut mux, LIMIT, |mux| {
            history_text(mux.registry().get(0).unwrap()).contains("ccc")
                && history_text(mux.registry().get(1).unwrap()).contains("bbb")
        });
        assert!(arrived, "input never echoed");

        let first = history_text(mux.registry().get(0).unwrap());
        let second = history_text(mux.registry().get(1).unwrap());
        assert!(first.contains("aaa") && !first.contains("bbb"), "{first:?}");
        assert!(!second.contains("aaa") && !second.contains("ccc"), "{second:?}");
        assert_eq!(mux.registry().active_index(), 0);

        mux.shutdown();
    }

    #[test]
    fn test_switch_to_exited_session_shows_banner() {
        init_test_logging();
        let (mut mux, _keys) = memory_mux(&cat_config(2));

        assert!(mux.switch_active(1).unwrap());
        mux.registry_mut().get_mut(0).unwrap().mark_exited();

        let before = screen_text(&mux).len();
        assert!(mux.switch_active(0).unwrap());
        let redraw = screen_text(&mux)[before..].to_string();
        assert!(redraw.contains("[session 1 exited"), "{redraw:?}");
        assert!(redraw.contains("1x"), "{redraw:?}");

        // Typing at a dead session goes nowhere.
        mux.handle_input(b"abc").unwrap();
        let session = mux.registry_mut().get_mut(0).unwrap();
        assert!(matches!(session.forward_input(b'x'), Err(SessionError::Closed(0))));

        mux.shutdown();
    }

    #[test]
    fn test_child_exit_is_detected_and_reported() {
        init_test_logging();
        let config = MuxConfig {
            command: sh("printf GOODBYE; exit 3"),
            ..cat_config(1)
        };
        let (mut mux, _keys) = memory_mux(&config);

        let reaped = drive_until(&mut mux, LIMIT, |mux| {
            mux.registry().active().exit_status() == Some(3)
        });
        assert!(reaped, "child exit never recorded");

        let session = mux.registry().active();
        assert!(session.is_exited());
        assert!(history_text(session).contains("GOODBYE"));

        let screen = screen_text(&mux);
        assert!(screen.contains("GOODBYE"));
        assert!(screen.contains("[session 1 exited with status 3]"), "{screen:?}");
        assert_eq!(mux.state(), MuxState::Running, "one session exiting does not stop the loop");

        assert_eq!(mux.shutdown(), vec![3]);
    }

    #[test]
    fn test_final_output_survives_exit() {
        init_test_logging();
        // About 16 KiB of output, several read chunks' worth, then a marker.
        let script = "i=0; while [ $i -lt 400 ]; do echo \"line $i of the final burst......\"; i=$((i+1)); done; printf TAIL_MARKER";

        for _ in 0..5 {
            let config = MuxConfig {
                command: sh(script),
                history_capacity: 64 * 1024,
                ..cat_config(1)
            };
            let (mut mux, _keys) = memory_mux(&config);

            let reaped = drive_until(&mut mux, LIMIT, |mux| {
                mux.registry().active().exit_status().is_some()
            });
            assert!(reaped, "child exit never recorded");

            let history = history_text(mux.registry().active());
            assert!(history.contains("line 0 of"), "history lost its head");
            assert!(
                history.ends_with("TAIL_MARKER"),
                "history lost its tail ({} bytes)",
                history.len()
            );
            assert!(screen_text(&mux).contains("TAIL_MARKER"));

            assert_eq!(mux.shutdown(), vec![0]);
        }
    }

    #[test]
    fn test_only_active_output_is_streamed() {
        init_test_logging();
        let config = MuxConfig {
            command: sh("sleep 0.3; printf LATE_OUTPUT; exec sleep 30"),
            ..cat_config(2)
        };
        let (mut mux, _keys) = memory_mux(&config);

        let both = drive_until(&mut mux, LIMIT, |mux| {
            mux.registry()
                .iter()
                .all(|s| history_text(s).contains("LATE_OUTPUT"))
        });
        assert!(both, "sessions never produced output");
        assert_eq!(screen_text(&mux).matches("LATE_OUTPUT").count(), 1);

        assert!(mux.switch_active(1).unwrap());
        assert_eq!(screen_text(&mux).matches("LATE_OUTPUT").count(), 2);

        mux.shutdown();
    }

    #[test]
    fn test_quit_signals_and_reaps_every_session() {
        use nix::pty::openpty;
        use nix::sys::termios::{tcgetattr, LocalFlags};
        use ptymux::TerminalGuard;

        init_test_logging();

        // A pty peer stands in for the operator's terminal.
        let terminal = openpty(None, None).unwrap();
        let before = tcgetattr(&terminal.slave).unwrap();
        let mut guard = TerminalGuard::enter_raw_mode(terminal.slave.try_clone().unwrap()).unwrap();

        let (mut mux, mut keys) = memory_mux(&cat_config(2));
        type_keys(&mut keys, &[DEFAULT_PREFIX, b'q']);

        let statuses = mux.run().expect("multiplexer run");
        assert_eq!(mux.state(), MuxState::Terminated);
        assert_eq!(statuses.len(), 2);
        for status in &statuses {
            assert!(*status > 128, "session should die from a signal, got {status}");
        }
        for session in mux.registry().iter() {
            assert!(session.is_exited());
            assert!(session.exit_status().is_some());
        }

        drop(mux);
        guard.restore().unwrap();
        let after = tcgetattr(&terminal.slave).unwrap();
        assert_eq!(after.local_flags, before.local_flags);
        assert!(after.local_flags.contains(LocalFlags::ECHO));
    }

    #[test]
    fn test_end_of_input_shuts_down() {
        init_test_logging();
        let (mut mux, keys) = memory_mux(&cat_config(2));
        drop(keys);

        let statuses = mux.run().expect("multiplexer run");
        assert_eq!(statuses.len(), 2);
        assert_eq!(mux.state(), MuxState::Terminated);
    }

    #[test]
    fn test_initial_redraw_lists_sessions() {
        let (mut mux, keys) = memory_mux(&cat_config(3));
        drop(keys);
        mux.run().expect("multiplexer run");

        let screen = screen_text(&mux);
        assert!(screen.contains("[1+]"), "{screen:?}");
        assert!(screen.contains("2+"), "{screen:?}");
        assert!(screen.contains("3+"), "{screen:?}");
    }
}
