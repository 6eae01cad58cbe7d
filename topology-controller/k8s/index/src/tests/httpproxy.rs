use super::*;
use pretty_assertions::assert_eq;
use topology_controller_core::{
    HeaderMatch, HeaderMatchKind, PathMatch, RouteAction, RouteMatch,
};
use topology_controller_k8s_api::projectcontour::httpproxy::{
    HeaderMatchCondition, HttpRequestRedirectPolicy, Include, MatchCondition, Route, Service,
    TimeoutPolicy, VirtualHost,
};

fn root(fqdn: &str, routes: Vec<Route>, includes: Vec<Include>) -> HttpProxySpec {
    HttpProxySpec {
        virtualhost: Some(VirtualHost {
            fqdn: fqdn.to_string(),
            tls: None,
        }),
        routes,
        includes,
    }
}

fn child(routes: Vec<Route>, includes: Vec<Include>) -> HttpProxySpec {
    HttpProxySpec {
        virtualhost: None,
        routes,
        includes,
    }
}

fn prefix(p: &str) -> MatchCondition {
    MatchCondition {
        prefix: Some(p.to_string()),
        header: None,
    }
}

fn route(conditions: Vec<MatchCondition>, services: &[(&str, i32)]) -> Route {
    Route {
        conditions,
        services: services
            .iter()
            .map(|(name, port)| Service {
                name: name.to_string(),
                port: *port,
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn include(name: &str, conditions: Vec<MatchCondition>) -> Include {
    Include {
        name: name.to_string(),
        namespace: None,
        conditions,
    }
}

fn reasons(build: &Build, object: &ObjectRef) -> Vec<Reason> {
    errors(build, object).into_iter().map(|(r, _)| r).collect()
}

#[test]
fn root_routes() {
    let snapshot = Snapshot::default()
        .with(mk_service("ns-0", "svc", [("http", 80)]))
        .with(mk_proxy(
            "ns-0",
            "root",
            root("example.com", vec![route(vec![], &[("svc", 80)])], vec![]),
        ));

    let build = build(&snapshot);
    assert!(build.graph.secure("example.com").is_none());
    let vhost = build.graph.insecure("example.com").expect("host must exist");
    assert_eq!(
        vhost.owner(),
        Some(&topology_controller_core::Owner::Exclusive(proxy_ref("ns-0", "root")))
    );
    let route = vhost.route(&RouteMatch::prefix("/")).expect("route must exist");
    assert_eq!(route.clusters().len(), 1);
    assert_eq!(route.clusters()[0].upstream.to_string(), "ns-0/svc:80");
    assert_eq!(
        build.conditions,
        vec![topology_controller_core::Condition::accepted(proxy_ref("ns-0", "root"))]
    );
}

#[test]
fn include_conditions_concatenate() {
    let snapshot = Snapshot::default()
        .with(mk_service("ns-1", "svc", [("http", 80)]))
        .with(mk_proxy(
            "ns-0",
            "root",
            root(
                "example.com",
                vec![],
                vec![Include {
                    name: "child".to_string(),
                    namespace: Some("ns-1".to_string()),
                    conditions: vec![
                        prefix("/api"),
                        MatchCondition {
                            prefix: None,
                            header: Some(HeaderMatchCondition {
                                name: "x-tenant".to_string(),
                                exact: Some("a".to_string()),
                                ..Default::default()
                            }),
                        },
                    ],
                }],
            ),
        ))
        .with(mk_proxy(
            "ns-1",
            "child",
            child(
                vec![
                    route(vec![prefix("/v1")], &[("svc", 80)]),
                    route(
                        vec![MatchCondition {
                            prefix: None,
                            header: Some(HeaderMatchCondition {
                                name: "X-Debug".to_string(),
                                present: true,
                                ..Default::default()
                            }),
                        }],
                        &[("svc", 80)],
                    ),
                ],
                vec![],
            ),
        ));

    let build = build(&snapshot);
    let vhost = build.graph.insecure("example.com").expect("host must exist");
    let tenant = HeaderMatch::new("x-tenant", HeaderMatchKind::Exact("a".to_string()));
    let v1 = RouteMatch::new(PathMatch::Prefix("/api/v1".to_string()), Some(tenant.clone()), None);
    let debug = RouteMatch::new(
        PathMatch::Prefix("/api".to_string()),
        vec![tenant, HeaderMatch::new("x-debug", HeaderMatchKind::Present)],
        None,
    );
    assert_eq!(
        vhost.routes().map(|r| r.route_match.clone()).collect::<Vec<_>>(),
        vec![v1.clone(), debug]
    );
    assert_eq!(
        vhost.route(&v1).expect("route must exist").source,
        proxy_ref("ns-1", "child")
    );
    assert!(is_accepted(&build, &proxy_ref("ns-0", "root")));
    assert!(is_accepted(&build, &proxy_ref("ns-1", "child")));
}

#[test]
fn include_cycle() {
    let snapshot = Snapshot::default()
        .with(mk_service("ns-0", "svc", [("http", 80)]))
        .with(mk_proxy(
            "ns-0",
            "root",
            root(
                "example.com",
                vec![route(vec![], &[("svc", 80)])],
                vec![include("a", vec![prefix("/a")])],
            ),
        ))
        .with(mk_proxy(
            "ns-0",
            "a",
            child(
                vec![route(vec![prefix("/x")], &[("svc", 80)])],
                vec![include("b", vec![prefix("/b")])],
            ),
        ))
        .with(mk_proxy(
            "ns-0",
            "b",
            child(
                vec![route(vec![prefix("/y")], &[("svc", 80)])],
                vec![include("a", vec![prefix("/c")])],
            ),
        ));

    let build = build(&snapshot);

    let vhost = build.graph.insecure("example.com").expect("host must exist");
    assert_eq!(
        vhost.routes().map(|r| r.source.clone()).collect::<Vec<_>>(),
        vec![proxy_ref("ns-0", "root")],
        "cycle participants must not contribute routes"
    );

    let cycles = build
        .conditions
        .iter()
        .filter(|c| c.reason == Reason::IncludeCycle)
        .collect::<Vec<_>>();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].object, proxy_ref("ns-0", "b"));
    assert_eq!(
        cycles[0].message,
        "include creates a cycle: ns-0/a -> ns-0/b -> ns-0/a"
    );
    assert!(is_accepted(&build, &proxy_ref("ns-0", "a")));
}

#[test]
fn self_include_is_a_cycle() {
    let snapshot = Snapshot::default()
        .with(mk_service("ns-0", "svc", [("http", 80)]))
        .with(mk_proxy(
            "ns-0",
            "root",
            root(
                "example.com",
                vec![route(vec![], &[("svc", 80)])],
                vec![include("root", vec![prefix("/again")])],
            ),
        ));

    let build = build(&snapshot);
    assert_eq!(build.graph.route_count(), 0);
    assert_eq!(reasons(&build, &proxy_ref("ns-0", "root")), vec![Reason::IncludeCycle]);
}

#[test]
fn include_errors() {
    let snapshot = Snapshot::default()
        .with(mk_service("ns-0", "svc", [("http", 80)]))
        .with(mk_proxy(
            "ns-0",
            "root",
            root(
                "example.com",
                vec![route(vec![], &[("svc", 80)])],
                vec![
                    include("missing", vec![prefix("/missing")]),
                    include("other-root", vec![prefix("/other")]),
                ],
            ),
        ))
        .with(mk_proxy(
            "ns-0",
            "other-root",
            root("other.example.com", vec![route(vec![], &[("svc", 80)])], vec![]),
        ));

    let build = build(&snapshot);
    assert_eq!(
        errors(&build, &proxy_ref("ns-0", "root")),
        vec![
            (
                Reason::IncludeNotFound,
                "include ns-0/missing not found".to_string()
            ),
            (
                Reason::RootIncludesRoot,
                "root httpproxy cannot include another root httpproxy ns-0/other-root"
                    .to_string()
            ),
        ]
    );
    // Include errors do not affect the root's own routes.
    assert_eq!(build.graph.route_count(), 2);
    assert!(is_accepted(&build, &proxy_ref("ns-0", "other-root")));
}

#[test]
fn orphaned_proxies() {
    let snapshot = Snapshot::default()
        .with(mk_service("ns-0", "svc", [("http", 80)]))
        .with(mk_proxy(
            "ns-0",
            "orphan",
            child(vec![route(vec![], &[("svc", 80)])], vec![]),
        ));

    let build = build(&snapshot);
    assert!(build.graph.is_empty());
    assert_eq!(reasons(&build, &proxy_ref("ns-0", "orphan")), vec![Reason::Orphaned]);
}

#[test]
fn duplicate_fqdn() {
    let snapshot = Snapshot::default()
        .with(mk_service("ns-0", "svc", [("http", 80)]))
        .with(mk_proxy(
            "ns-0",
            "a",
            root("example.com", vec![route(vec![], &[("svc", 80)])], vec![]),
        ))
        .with(mk_proxy(
            "ns-0",
            "b",
            root(
                "example.com",
                vec![route(vec![prefix("/b")], &[("svc", 80)])],
                vec![],
            ),
        ));

    let build = build(&snapshot);
    let vhost = build.graph.insecure("example.com").expect("host must exist");
    assert_eq!(vhost.route_count(), 1);
    assert!(is_accepted(&build, &proxy_ref("ns-0", "a")));
    assert_eq!(
        errors(&build, &proxy_ref("ns-0", "b")),
        vec![(
            Reason::DuplicateVhost,
            "fqdn \"example.com\" is used in multiple HTTPProxies: HTTPProxy ns-0/a".to_string()
        )]
    );
}

#[test]
fn invalid_roots() {
    let config = BuildConfig {
        root_namespaces: vec!["infra".to_string()],
        ..Default::default()
    };
    let snapshot = Snapshot::default()
        .with(mk_service("infra", "svc", [("http", 80)]))
        .with(mk_proxy(
            "ns-0",
            "outside",
            root("a.example.com", vec![route(vec![], &[("svc", 80)])], vec![]),
        ))
        .with(mk_proxy(
            "infra",
            "wildcard",
            root("*.example.com", vec![route(vec![], &[("svc", 80)])], vec![]),
        ))
        .with(mk_proxy(
            "infra",
            "valid",
            root("b.example.com", vec![route(vec![], &[("svc", 80)])], vec![]),
        ));

    let build = build_with(config, &snapshot);
    assert_eq!(
        reasons(&build, &proxy_ref("ns-0", "outside")),
        vec![Reason::RootNamespaceNotAllowed]
    );
    assert_eq!(
        reasons(&build, &proxy_ref("infra", "wildcard")),
        vec![Reason::InvalidVirtualHost]
    );
    assert!(is_accepted(&build, &proxy_ref("infra", "valid")));
    assert_eq!(
        build.graph.virtual_hosts().map(|vh| vh.hostname()).collect::<Vec<_>>(),
        vec!["b.example.com"]
    );
}

#[test]
fn invalid_routes() {
    let both = Route {
        request_redirect_policy: Some(HttpRequestRedirectPolicy::default()),
        ..route(vec![prefix("/both")], &[("svc", 80)])
    };
    let neither = route(vec![prefix("/neither")], &[]);
    let two_prefixes = route(vec![prefix("/a"), prefix("/b")], &[("svc", 80)]);
    let bad_timeout = Route {
        timeout_policy: Some(TimeoutPolicy {
            response: Some("forever".to_string()),
        }),
        ..route(vec![prefix("/timeout")], &[("svc", 80)])
    };
    let valid = route(vec![prefix("/valid")], &[("svc", 80)]);
    let snapshot = Snapshot::default()
        .with(mk_service("ns-0", "svc", [("http", 80)]))
        .with(mk_proxy(
            "ns-0",
            "root",
            root(
                "example.com",
                vec![both, neither, two_prefixes, bad_timeout, valid],
                vec![],
            ),
        ));

    let build = build(&snapshot);
    assert_eq!(
        reasons(&build, &proxy_ref("ns-0", "root")),
        vec![
            Reason::InvalidMatch,
            Reason::InvalidRoute,
            Reason::InvalidRoute,
            Reason::InvalidRoute,
        ]
    );
    let vhost = build.graph.insecure("example.com").expect("host must exist");
    assert_eq!(vhost.route_count(), 1);
    assert!(vhost.route(&RouteMatch::prefix("/valid")).is_some());
}

#[test]
fn weights_and_redirects() {
    let weighted = Route {
        services: vec![
            Service {
                name: "svc-a".to_string(),
                port: 80,
                weight: Some(90),
                ..Default::default()
            },
            Service {
                name: "svc-b".to_string(),
                port: 80,
                ..Default::default()
            },
        ],
        ..route(vec![prefix("/weighted")], &[])
    };
    let redirect = Route {
        request_redirect_policy: Some(HttpRequestRedirectPolicy {
            hostname: Some("other.example.com".to_string()),
            status_code: Some(301),
            ..Default::default()
        }),
        ..route(vec![prefix("/moved")], &[])
    };
    let snapshot = Snapshot::default()
        .with(mk_service("ns-0", "svc-a", [("http", 80)]))
        .with(mk_service("ns-0", "svc-b", [("http", 80)]))
        .with(mk_proxy(
            "ns-0",
            "root",
            root("example.com", vec![weighted, redirect], vec![]),
        ));

    let build = build(&snapshot);
    let vhost = build.graph.insecure("example.com").expect("host must exist");

    let weights = vhost
        .route(&RouteMatch::prefix("/weighted"))
        .expect("route must exist")
        .clusters()
        .iter()
        .map(|c| (c.upstream.name.as_str(), c.weight))
        .collect::<Vec<_>>();
    assert_eq!(weights, vec![("svc-a", 90), ("svc-b", 0)]);

    let moved = vhost
        .route(&RouteMatch::prefix("/moved"))
        .expect("route must exist");
    match &moved.action {
        RouteAction::Redirect(redirect) => {
            assert_eq!(redirect.hostname.as_deref(), Some("other.example.com"));
            assert_eq!(redirect.status, 301);
        }
        action => panic!("unexpected action: {action:?}"),
    }
}

#[test]
fn duplicate_routes_keep_the_first() {
    let snapshot = Snapshot::default()
        .with(mk_service("ns-0", "svc", [("http", 80)]))
        .with(mk_proxy(
            "ns-0",
            "root",
            root(
                "example.com",
                vec![route(vec![prefix("/api")], &[("svc", 80)])],
                vec![include("child", vec![])],
            ),
        ))
        .with(mk_proxy(
            "ns-0",
            "child",
            child(vec![route(vec![prefix("/api")], &[("svc", 80)])], vec![]),
        ));

    let build = build(&snapshot);
    let vhost = build.graph.insecure("example.com").expect("host must exist");
    assert_eq!(
        vhost
            .route(&RouteMatch::prefix("/api"))
            .expect("route must exist")
            .source,
        proxy_ref("ns-0", "root")
    );
    assert_eq!(
        reasons(&build, &proxy_ref("ns-0", "child")),
        vec![Reason::DuplicateRoute]
    );
}

#[test]
fn ignores_other_classes() {
    let mut proxy = mk_proxy(
        "ns-0",
        "root",
        root("example.com", vec![route(vec![], &[("svc", 80)])], vec![]),
    );
    proxy.metadata.annotations = Some(btreemap! {
        "projectcontour.io/ingress.class".to_string() => "internal".to_string(),
    });
    let snapshot = Snapshot::default()
        .with(mk_service("ns-0", "svc", [("http", 80)]))
        .with(proxy);

    let build = build(&snapshot);
    assert!(build.graph.is_empty());
    assert!(build.conditions.is_empty());

    let config = BuildConfig {
        ingress_class_name: Some("internal".to_string()),
        ..Default::default()
    };
    let build = build_with(config, &snapshot);
    assert_eq!(build.graph.len(), 1);
}
